//! Agent identity allocation.
//!
//! An identifier is the reported host name, the reported user name and the
//! registration instant (epoch seconds) joined by underscores. Nothing
//! stronger: two registrations with identical host, user and second collide
//! and the later one overwrites the earlier registry entry. That precision
//! limit is accepted behavior, not something to paper over here.

use chrono::Utc;
use serde_json::{Map, Value};

/// Sentinel used when an agent omits its host or user name.
pub const UNKNOWN: &str = "UNKNOWN";

/// Attribute key agents use for their host name.
pub const HOST_KEY: &str = "computer_name";

/// Attribute key agents use for their user name.
pub const USER_KEY: &str = "user";

/// Mint an identifier from raw registration attributes.
pub fn mint(attributes: &Map<String, Value>) -> String {
    let host = attr_or_unknown(attributes, HOST_KEY);
    let user = attr_or_unknown(attributes, USER_KEY);
    format!("{}_{}_{}", host, user, Utc::now().timestamp())
}

fn attr_or_unknown<'a>(attributes: &'a Map<String, Value>, key: &str) -> &'a str {
    attributes
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn identifier_carries_host_and_user() {
        let id = mint(&attrs(json!({"computer_name": "BOX1", "user": "alice"})));
        assert!(id.starts_with("BOX1_alice_"));
        let stamp = id.rsplit('_').next().unwrap();
        assert!(stamp.parse::<i64>().is_ok());
    }

    #[test]
    fn missing_attributes_fall_back_to_sentinel() {
        let id = mint(&Map::new());
        assert!(id.starts_with("UNKNOWN_UNKNOWN_"));
    }

    #[test]
    fn blank_attributes_fall_back_to_sentinel() {
        let id = mint(&attrs(json!({"computer_name": "  ", "user": ""})));
        assert!(id.starts_with("UNKNOWN_UNKNOWN_"));
    }

    #[test]
    fn non_string_attributes_fall_back_to_sentinel() {
        let id = mint(&attrs(json!({"computer_name": 7, "user": ["alice"]})));
        assert!(id.starts_with("UNKNOWN_UNKNOWN_"));
    }
}
