//! Common types used across ESP
//!
//! The event model shared by the ingestion engine and its tooling:
//!
//! - [`RawRecord`]: one unparsed line of a source file
//! - [`Event`]: a validated, typed user action
//! - [`RejectedRecord`]: a raw record plus the reason it was quarantined
//! - [`WorkUnit`]: one source file discovered in the landing directory

mod event;
mod record;
mod work_unit;

pub use event::{Event, EventType, TIMESTAMP_FORMAT};
pub use record::{RawRecord, RejectReason, RejectedRecord, SOURCE_COLUMNS};
pub use work_unit::{WorkUnit, WorkUnitId};
