//! The structured-output contract shared between request building and result
//! parsing.
//!
//! The JSON Schema sent with every batch line and the typed parser applied to
//! every result line are generated from the same constants, so the two sides
//! cannot drift apart.

use serde::Deserialize;
use serde_json::{json, Value};

pub const SCHEMA_NAME: &str = "CoffeeShopPerspective";

pub const RATING_MIN: i64 = 1;
pub const RATING_MAX: i64 = 5;
pub const EVIDENCE_MAX_ITEMS: usize = 3;
pub const SOURCES_MAX_ITEMS: usize = 8;

/// Parking availability as reported by the model. `Unknown` is a valid
/// answer, not a parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parking {
    Free,
    Paid,
    Street,
    None,
    Unknown,
}

impl Parking {
    pub fn as_str(&self) -> &'static str {
        match self {
            Parking::Free => "free",
            Parking::Paid => "paid",
            Parking::Street => "street",
            Parking::None => "none",
            Parking::Unknown => "unknown",
        }
    }

    pub const ALL: [Parking; 5] = [
        Parking::Free,
        Parking::Paid,
        Parking::Street,
        Parking::None,
        Parking::Unknown,
    ];
}

/// The strict JSON Schema document attached to every batch request line.
pub fn output_schema() -> Value {
    let rating = json!({ "type": "integer", "minimum": RATING_MIN, "maximum": RATING_MAX });
    let parking_options: Vec<&str> = Parking::ALL.iter().map(|p| p.as_str()).collect();
    json!({
        "name": SCHEMA_NAME,
        "strict": true,
        "schema": {
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "decoration": rating.clone(),
                "coffee": rating.clone(),
                "studySuitable": rating,
                "parking": { "type": "string", "enum": parking_options },
                "evidence": {
                    "type": "array",
                    "items": { "type": "string" },
                    "maxItems": EVIDENCE_MAX_ITEMS
                },
                "sources_used": {
                    "type": "array",
                    "items": { "type": "string" },
                    "maxItems": SOURCES_MAX_ITEMS
                }
            },
            "required": [
                "decoration", "coffee", "studySuitable",
                "parking", "evidence", "sources_used"
            ]
        }
    })
}

/// A model answer that satisfied the output contract.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScorePayload {
    pub decoration: i64,
    pub coffee: i64,
    #[serde(rename = "studySuitable")]
    pub study_suitable: i64,
    pub parking: Parking,
    pub evidence: Vec<String>,
    pub sources_used: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaViolation {
    #[error("payload does not match the score schema: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("{field} rating {value} is outside 1..=5")]
    RatingOutOfRange { field: &'static str, value: i64 },
    #[error("evidence has {0} entries, at most 3 allowed")]
    TooMuchEvidence(usize),
    #[error("sources_used has {0} entries, at most 8 allowed")]
    TooManySources(usize),
}

/// Parse and fully validate a structured-output text against the contract.
///
/// The provider is asked for strict schema adherence but is not trusted to
/// deliver it; everything the schema promises is re-checked here.
pub fn parse_payload(text: &str) -> Result<ScorePayload, SchemaViolation> {
    let payload: ScorePayload = serde_json::from_str(text)?;

    for (field, value) in [
        ("decoration", payload.decoration),
        ("coffee", payload.coffee),
        ("studySuitable", payload.study_suitable),
    ] {
        if !(RATING_MIN..=RATING_MAX).contains(&value) {
            return Err(SchemaViolation::RatingOutOfRange { field, value });
        }
    }
    if payload.evidence.len() > EVIDENCE_MAX_ITEMS {
        return Err(SchemaViolation::TooMuchEvidence(payload.evidence.len()));
    }
    if payload.sources_used.len() > SOURCES_MAX_ITEMS {
        return Err(SchemaViolation::TooManySources(payload.sources_used.len()));
    }
    Ok(payload)
}
