//! Builds the JSONL bulk-request document for one batch of targets.

use super::schema::output_schema;
use crate::store::Target;
use serde_json::json;

/// Prefix prepended to target ids to form the per-line `custom_id`.
pub const CUSTOM_ID_PREFIX: &str = "biz_";

/// Provider endpoint every batch line is executed against.
pub const BATCH_ENDPOINT: &str = "/v1/responses";

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const MAX_OUTPUT_TOKENS: u32 = 400;

const SYSTEM_PROMPT: &str = "Use the web_search tool to find credible pages (official site, \
     local press, blogs, Reddit). If parking, study-friendliness, or other aspects are \
     unclear, answer 'unknown'. Do NOT scrape or summarize Google Maps/Yelp review pages; \
     skip those sources. Return ONLY JSON matching the provided schema.";

pub fn custom_id_for(target_id: &str) -> String {
    format!("{}{}", CUSTOM_ID_PREFIX, target_id)
}

/// Recover the target id from a result line's `custom_id`. Returns the id
/// unchanged when the prefix is absent, mirroring a plain prefix-strip.
pub fn target_id_from_custom_id(custom_id: &str) -> &str {
    custom_id.strip_prefix(CUSTOM_ID_PREFIX).unwrap_or(custom_id)
}

fn user_prompt(target: &Target) -> String {
    let city_suffix = target
        .city
        .as_deref()
        .map(|c| format!(", {}", c))
        .unwrap_or_default();
    format!(
        "Analyze this coffee shop:\nName: {}\nAddress: {}{}\n\
         Perspectives: decoration, coffee, studySuitable, parking. \
         Provide 2\u{2013}3 short quotes in evidence and list source URLs.",
        target.name, target.address, city_suffix
    )
}

/// One JSON object per target, newline separated, with a trailing newline.
pub fn build_batch_document(targets: &[Target], model: &str) -> String {
    let mut document = String::new();
    for target in targets {
        let body = json!({
            "model": model,
            "tools": [{ "type": "web_search" }],
            "response_format": { "type": "json_schema", "json_schema": output_schema() },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_prompt(target) }
            ],
            "max_output_tokens": MAX_OUTPUT_TOKENS
        });
        let line = json!({
            "custom_id": custom_id_for(&target.id),
            "method": "POST",
            "url": BATCH_ENDPOINT,
            "body": body
        });
        document.push_str(&line.to_string());
        document.push('\n');
    }
    document
}
