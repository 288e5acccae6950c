//! Record cleaning and validation
//!
//! [`Validator::validate`] turns one [`RawRecord`] into either a typed
//! [`Event`] or a [`RejectedRecord`]. Rules run in a fixed order and the first
//! failure wins:
//!
//! 1. every column present and non-blank (`MissingField`, `event_id` excepted)
//!    and free of NUL bytes (`MalformedRow`)
//! 2. `price` parses as a decimal greater than zero that PostgreSQL `NUMERIC`
//!    can hold (`MalformedNumeric`)
//! 3. `event_type` is a known kind (`UnknownEventType`)
//! 4. `timestamp` parses and is not beyond the skew tolerance
//!    (`MalformedTimestamp`, `TimestampOutOfRange`)
//! 5. `event_id` is present and well-formed (`MissingOrMalformedId`)
//!
//! Fields are trimmed and `event_type` is lower-cased before the checks.

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use esp_common::types::{Event, EventType, RawRecord, RejectReason, RejectedRecord, TIMESTAMP_FORMAT};
use std::str::FromStr;

/// Upper bound on `event_id` length
pub const MAX_EVENT_ID_LEN: usize = 128;

/// Digits before the decimal point that `NUMERIC` accepts
pub const MAX_PRICE_INTEGRAL_DIGITS: i64 = 131_072;

/// Digits after the decimal point that `NUMERIC` accepts
pub const MAX_PRICE_FRACTIONAL_DIGITS: i64 = 16_383;

/// Stateless record validator
#[derive(Debug, Clone)]
pub struct Validator {
    clock_skew: Duration,
}

impl Validator {
    pub fn new(clock_skew: Duration) -> Self {
        Self { clock_skew }
    }

    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }

    /// Validate one record against the ingestion time `now`
    pub fn validate(&self, raw: &RawRecord, now: DateTime<Utc>) -> Result<Event, RejectedRecord> {
        let reject = |reason: RejectReason, detail: String| {
            Err(RejectedRecord::new(raw.clone(), reason, detail))
        };

        let user_id = cleaned(&raw.user_id);
        let product_id = cleaned(&raw.product_id);
        let product_name = cleaned(&raw.product_name);
        let category = cleaned(&raw.category);
        let price = cleaned(&raw.price);
        let event_type = cleaned(&raw.event_type);
        let timestamp = cleaned(&raw.timestamp);

        let required = [
            ("user_id", user_id),
            ("product_id", product_id),
            ("product_name", product_name),
            ("category", category),
            ("price", price),
            ("event_type", event_type),
            ("timestamp", timestamp),
        ];
        for (column, value) in required {
            if value.is_none() {
                return reject(RejectReason::MissingField, column.to_string());
            }
        }
        for (column, value) in required {
            if value.is_some_and(|v| v.contains('\0')) {
                return reject(RejectReason::MalformedRow, format!("{} contains a NUL byte", column));
            }
        }
        let (
            Some(user_id),
            Some(product_id),
            Some(product_name),
            Some(category),
            Some(price),
            Some(event_type),
            Some(timestamp),
        ) = (user_id, product_id, product_name, category, price, event_type, timestamp)
        else {
            return reject(RejectReason::MissingField, "required column".to_string());
        };

        let price = match BigDecimal::from_str(price) {
            Ok(p) if p <= BigDecimal::zero() => {
                return reject(RejectReason::MalformedNumeric, format!("price {} is not positive", price))
            },
            Ok(p) => match storable_price(p) {
                Some(p) => p,
                None => {
                    return reject(
                        RejectReason::MalformedNumeric,
                        format!("price {} is outside the storable range", price),
                    )
                },
            },
            Err(e) => return reject(RejectReason::MalformedNumeric, format!("price '{}': {}", price, e)),
        };

        let event_type = match EventType::from_str(&event_type.to_lowercase()) {
            Ok(t) => t,
            Err(e) => return reject(RejectReason::UnknownEventType, e),
        };

        let event_timestamp = match NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT) {
            Ok(naive) => naive.and_utc(),
            Err(e) => {
                return reject(RejectReason::MalformedTimestamp, format!("timestamp '{}': {}", timestamp, e))
            },
        };
        if event_timestamp > now + self.clock_skew {
            return reject(
                RejectReason::TimestampOutOfRange,
                format!(
                    "timestamp {} is {}s ahead of ingestion time",
                    timestamp,
                    (event_timestamp - now).num_seconds()
                ),
            );
        }

        let event_id = match cleaned(&raw.event_id) {
            Some(id) if is_well_formed_id(id) => id,
            Some(id) => return reject(RejectReason::MissingOrMalformedId, format!("event_id '{}'", id)),
            None => return reject(RejectReason::MissingOrMalformedId, "event_id is missing".to_string()),
        };

        Ok(Event {
            event_id: event_id.to_string(),
            user_id: user_id.to_string(),
            product_id: product_id.to_string(),
            product_name: product_name.to_string(),
            category: category.to_string(),
            price,
            event_type,
            event_timestamp,
        })
    }
}

/// The price as it will be stored, or `None` if `NUMERIC` cannot hold it
///
/// Trailing zeros beyond the fractional limit are dropped rather than rejected.
fn storable_price(price: BigDecimal) -> Option<BigDecimal> {
    let price = if price.as_bigint_and_exponent().1 > MAX_PRICE_FRACTIONAL_DIGITS {
        price.normalized()
    } else {
        price
    };

    let scale = price.as_bigint_and_exponent().1;
    let integral_digits = price.digits() as i64 - scale;
    (scale <= MAX_PRICE_FRACTIONAL_DIGITS && integral_digits <= MAX_PRICE_INTEGRAL_DIGITS).then_some(price)
}

fn cleaned(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// 1..=128 ASCII alphanumerics or `-_.:`
pub fn is_well_formed_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_EVENT_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':'))
}
