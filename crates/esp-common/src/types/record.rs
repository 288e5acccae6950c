use serde::{Deserialize, Serialize};

/// Header columns of a source file, in order
pub const SOURCE_COLUMNS: [&str; 8] = [
    "event_id",
    "user_id",
    "product_id",
    "product_name",
    "category",
    "price",
    "event_type",
    "timestamp",
];

/// One data line of a source file, before any parsing
///
/// Every column is optional so that short rows and missing header columns
/// surface as validation failures instead of read errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub event_id: Option<String>,
    pub user_id: Option<String>,
    pub product_id: Option<String>,
    pub product_name: Option<String>,
    pub category: Option<String>,
    pub price: Option<String>,
    pub event_type: Option<String>,
    pub timestamp: Option<String>,
}

impl RawRecord {
    /// Column values in [`SOURCE_COLUMNS`] order, missing ones as empty strings
    pub fn to_row(&self) -> [&str; 8] {
        [
            self.event_id.as_deref().unwrap_or_default(),
            self.user_id.as_deref().unwrap_or_default(),
            self.product_id.as_deref().unwrap_or_default(),
            self.product_name.as_deref().unwrap_or_default(),
            self.category.as_deref().unwrap_or_default(),
            self.price.as_deref().unwrap_or_default(),
            self.event_type.as_deref().unwrap_or_default(),
            self.timestamp.as_deref().unwrap_or_default(),
        ]
    }
}

/// Why a record was quarantined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    /// A required column is absent or blank
    MissingField,
    /// `price` does not parse as a decimal, is not strictly positive, or is
    /// too large or too precise for the sink's numeric column
    MalformedNumeric,
    /// `event_type` is not one of view, add_to_cart, purchase
    UnknownEventType,
    /// `timestamp` does not match the fixed format
    MalformedTimestamp,
    /// `timestamp` lies further in the future than the skew tolerance
    TimestampOutOfRange,
    /// `event_id` is absent or not syntactically valid
    MissingOrMalformedId,
    /// `event_id` was already accepted earlier in this batch or process
    DuplicateId,
    /// The line could not be decoded as a CSV row, or holds bytes no text
    /// column can store
    MalformedRow,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingField => "MissingField",
            RejectReason::MalformedNumeric => "MalformedNumeric",
            RejectReason::UnknownEventType => "UnknownEventType",
            RejectReason::MalformedTimestamp => "MalformedTimestamp",
            RejectReason::TimestampOutOfRange => "TimestampOutOfRange",
            RejectReason::MissingOrMalformedId => "MissingOrMalformedId",
            RejectReason::DuplicateId => "DuplicateId",
            RejectReason::MalformedRow => "MalformedRow",
        }
    }

    /// Whether the record failed validation (as opposed to deduplication)
    pub fn is_validation_failure(&self) -> bool {
        !matches!(self, RejectReason::DuplicateId)
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record that will be written to the error sink instead of the main sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    /// The original, unparsed fields
    pub raw: RawRecord,
    pub reason: RejectReason,
    /// Human-readable specifics (offending field, parse error, ...)
    pub detail: String,
    /// Path of the source file, when known
    pub source_file: Option<String>,
    /// 1-based line number in the source file, header included
    pub line: Option<u64>,
}

impl RejectedRecord {
    pub fn new(raw: RawRecord, reason: RejectReason, detail: impl Into<String>) -> Self {
        Self {
            raw,
            reason,
            detail: detail.into(),
            source_file: None,
            line: None,
        }
    }

    /// Attach the location the record was read from
    pub fn at(mut self, source_file: impl Into<String>, line: u64) -> Self {
        self.source_file = Some(source_file.into());
        self.line = Some(line);
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_to_row_keeps_column_order() {
        let raw = RawRecord {
            event_id: Some("e1".into()),
            price: Some("9.99".into()),
            timestamp: Some("2026-01-01 00:00:00".into()),
            ..Default::default()
        };

        let row = raw.to_row();
        assert_eq!(row.len(), SOURCE_COLUMNS.len());
        assert_eq!(row[0], "e1");
        assert_eq!(row[1], "");
        assert_eq!(row[5], "9.99");
        assert_eq!(row[7], "2026-01-01 00:00:00");
    }

    #[test]
    fn test_duplicate_is_not_a_validation_failure() {
        assert!(!RejectReason::DuplicateId.is_validation_failure());
        assert!(RejectReason::MalformedNumeric.is_validation_failure());
        assert!(RejectReason::MalformedRow.is_validation_failure());
    }

    #[test]
    fn test_rejected_record_location() {
        let rejected = RejectedRecord::new(RawRecord::default(), RejectReason::MissingField, "user_id")
            .at("events_1.csv", 4);
        assert_eq!(rejected.source_file.as_deref(), Some("events_1.csv"));
        assert_eq!(rejected.line, Some(4));
        assert_eq!(rejected.reason.to_string(), "MissingField");
    }
}
