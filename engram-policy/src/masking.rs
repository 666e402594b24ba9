//! Confidentiality masking

use engram_core::Timestamp;
use serde::{Deserialize, Serialize};

/// Placeholder string replacing redacted content.
pub const REDACTED: &str = "[REDACTED]";

/// Redacted stand-in for a memory or scene the session may not read.
///
/// Carries only existence, time, and importance - never content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskedItem {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub time: Option<Timestamp>,
    pub importance: f64,
    pub details: String,
    pub masked: bool,
}

/// Build the masked projection of an item.
pub fn mask_item(id: impl ToString, time: Option<Timestamp>, importance: f64) -> MaskedItem {
    MaskedItem {
        id: id.to_string(),
        item_type: "private_event".to_string(),
        time,
        importance,
        details: REDACTED.to_string(),
        masked: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_projection_carries_no_content() {
        let masked = mask_item("abc", None, 0.5);
        assert_eq!(masked.details, REDACTED);
        assert!(masked.masked);
        assert_eq!(masked.item_type, "private_event");

        let json = serde_json::to_value(&masked).unwrap();
        assert_eq!(json["type"], "private_event");
        assert_eq!(json["details"], "[REDACTED]");
    }
}
