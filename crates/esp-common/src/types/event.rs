use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed format of the `timestamp` column in source files (UTC)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Kind of user action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    View,
    AddToCart,
    Purchase,
}

impl EventType {
    pub const ALL: [EventType; 3] = [EventType::View, EventType::AddToCart, EventType::Purchase];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::View => "view",
            EventType::AddToCart => "add_to_cart",
            EventType::Purchase => "purchase",
        }
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    /// Exact match on the wire spelling; callers normalize case beforehand
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(EventType::View),
            "add_to_cart" => Ok(EventType::AddToCart),
            "purchase" => Ok(EventType::Purchase),
            other => Err(format!("unknown event type '{}'", other)),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validated user action, ready for the sink
///
/// Immutable once produced by the validator. `price` is always strictly
/// positive and `event_timestamp` never lies beyond the clock-skew tolerance
/// of the ingestion time it was validated against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Opaque unique identifier; the deduplication key
    pub event_id: String,
    pub user_id: String,
    pub product_id: String,
    pub product_name: String,
    pub category: String,
    pub price: BigDecimal,
    pub event_type: EventType,
    /// When the action happened, as reported by the producer
    pub event_timestamp: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_round_trips_wire_names() {
        for event_type in EventType::ALL {
            assert_eq!(event_type.as_str().parse::<EventType>().unwrap(), event_type);
        }
    }

    #[test]
    fn test_event_type_is_case_sensitive() {
        assert!("VIEW".parse::<EventType>().is_err());
        assert!("refund".parse::<EventType>().is_err());
    }

    #[test]
    fn test_event_type_serde_uses_snake_case() {
        let json = serde_json::to_string(&EventType::AddToCart).unwrap();
        assert_eq!(json, "\"add_to_cart\"");
    }
}
