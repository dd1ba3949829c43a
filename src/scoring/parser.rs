//! Per-line parsing of the provider's batch output file.
//!
//! Each line is handled in isolation: any failure is reported as a
//! [`LineFailure`] for that line alone and never aborts processing of the
//! remaining lines.

use super::request::target_id_from_custom_id;
use super::schema::{parse_payload, SchemaViolation, ScorePayload};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum LineFailure {
    #[error("line is not valid JSON: {0}")]
    MalformedLine(#[source] serde_json::Error),
    #[error("line has no custom_id")]
    MissingCustomId,
    #[error("request failed with status {status:?}")]
    RequestFailed { status: Option<i64> },
    #[error("no output text found in response body")]
    NoOutputText,
    #[error(transparent)]
    SchemaViolation(#[from] SchemaViolation),
}

/// Ways of locating the structured-output text inside a response body, tried
/// in order. The shortcut field is preferred; the nested output array is the
/// long-form equivalent.
type ExtractFn = fn(&Value) -> Option<String>;
const EXTRACTION_STRATEGIES: &[(&str, ExtractFn)] = &[
    ("output_text", |body| {
        body.get("output_text")?.as_str().map(str::to_string)
    }),
    ("output[0].content[0].text", |body| {
        body.get("output")?
            .get(0)?
            .get("content")?
            .get(0)?
            .get("text")?
            .as_str()
            .map(str::to_string)
    }),
];

fn extract_output_text(body: &Value) -> Option<String> {
    EXTRACTION_STRATEGIES
        .iter()
        .find_map(|(_, extract)| extract(body))
}

/// Parse one output line into the target id it belongs to and its validated
/// payload.
pub fn parse_result_line(line: &str) -> Result<(String, ScorePayload), LineFailure> {
    let value: Value = serde_json::from_str(line).map_err(LineFailure::MalformedLine)?;

    let custom_id = value
        .get("custom_id")
        .and_then(Value::as_str)
        .ok_or(LineFailure::MissingCustomId)?;
    let target_id = target_id_from_custom_id(custom_id).to_string();

    let response = value.get("response");
    let status = response
        .and_then(|r| r.get("status_code"))
        .and_then(Value::as_i64);
    if status != Some(200) {
        return Err(LineFailure::RequestFailed { status });
    }

    let body = response
        .and_then(|r| r.get("body"))
        .ok_or(LineFailure::NoOutputText)?;
    let text = extract_output_text(body).ok_or(LineFailure::NoOutputText)?;

    let payload = parse_payload(&text)?;
    Ok((target_id, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::schema::Parking;
    use serde_json::json;

    fn payload_json() -> Value {
        json!({
            "decoration": 4,
            "coffee": 5,
            "studySuitable": 3,
            "parking": "free",
            "evidence": ["bright interior"],
            "sources_used": ["https://example.com"]
        })
    }

    fn line_with_output_text() -> String {
        json!({
            "custom_id": "biz_octane_30318",
            "response": {
                "status_code": 200,
                "body": { "output_text": payload_json().to_string() }
            }
        })
        .to_string()
    }

    #[test]
    fn parses_output_text_shortcut() {
        let (target_id, payload) = parse_result_line(&line_with_output_text()).unwrap();
        assert_eq!(target_id, "octane_30318");
        assert_eq!(payload.coffee, 5);
        assert_eq!(payload.parking, Parking::Free);
    }

    #[test]
    fn parses_nested_output_array() {
        let line = json!({
            "custom_id": "biz_octane_30318",
            "response": {
                "status_code": 200,
                "body": {
                    "output": [
                        { "content": [ { "text": payload_json().to_string() } ] }
                    ]
                }
            }
        })
        .to_string();

        let (target_id, payload) = parse_result_line(&line).unwrap();
        assert_eq!(target_id, "octane_30318");
        assert_eq!(payload.decoration, 4);
    }

    #[test]
    fn shortcut_wins_over_nested_form() {
        let mut nested = payload_json();
        nested["coffee"] = json!(1);
        let line = json!({
            "custom_id": "biz_x",
            "response": {
                "status_code": 200,
                "body": {
                    "output_text": payload_json().to_string(),
                    "output": [ { "content": [ { "text": nested.to_string() } ] } ]
                }
            }
        })
        .to_string();

        let (_, payload) = parse_result_line(&line).unwrap();
        assert_eq!(payload.coffee, 5);
    }

    #[test]
    fn rejects_non_json_line() {
        assert!(matches!(
            parse_result_line("not json at all"),
            Err(LineFailure::MalformedLine(_))
        ));
    }

    #[test]
    fn rejects_missing_custom_id() {
        let line = json!({ "response": { "status_code": 200 } }).to_string();
        assert!(matches!(
            parse_result_line(&line),
            Err(LineFailure::MissingCustomId)
        ));
    }

    #[test]
    fn rejects_failed_request_status() {
        let line = json!({
            "custom_id": "biz_x",
            "response": { "status_code": 500, "body": { "error": "overloaded" } }
        })
        .to_string();
        assert!(matches!(
            parse_result_line(&line),
            Err(LineFailure::RequestFailed { status: Some(500) })
        ));
    }

    #[test]
    fn missing_status_counts_as_failed_request() {
        let line = json!({ "custom_id": "biz_x", "response": {} }).to_string();
        assert!(matches!(
            parse_result_line(&line),
            Err(LineFailure::RequestFailed { status: None })
        ));
    }

    #[test]
    fn rejects_body_without_output_text() {
        let line = json!({
            "custom_id": "biz_x",
            "response": { "status_code": 200, "body": { "output": [] } }
        })
        .to_string();
        assert!(matches!(
            parse_result_line(&line),
            Err(LineFailure::NoOutputText)
        ));
    }

    #[test]
    fn rejects_payload_violating_schema() {
        let mut bad = payload_json();
        bad["decoration"] = json!(9);
        let line = json!({
            "custom_id": "biz_x",
            "response": { "status_code": 200, "body": { "output_text": bad.to_string() } }
        })
        .to_string();
        assert!(matches!(
            parse_result_line(&line),
            Err(LineFailure::SchemaViolation(_))
        ));
    }
}
