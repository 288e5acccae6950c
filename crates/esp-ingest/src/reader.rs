//! Source file decoding
//!
//! Turns the bytes of one landing file into [`SourceRow`]s, one per data line.
//! Each physical line is parsed on its own, so a broken line never absorbs
//! its neighbours. Nothing is dropped here: a line that cannot be decoded
//! still yields a row (with a [`RowDefect`]) so that every line is accounted
//! for downstream.

use esp_common::types::{RawRecord, RejectReason, SOURCE_COLUMNS};

/// A decoding problem that rejects the row before validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDefect {
    pub reason: RejectReason,
    pub detail: String,
}

/// One data line of a source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRow {
    /// 1-based line number, header included
    pub line: u64,
    pub raw: RawRecord,
    pub defect: Option<RowDefect>,
}

/// Column positions resolved from a header row
#[derive(Debug, Clone)]
struct ColumnMap {
    positions: [Option<usize>; 8],
}

impl ColumnMap {
    fn from_header(header: &[String]) -> Self {
        let mut positions = [None; 8];
        for (idx, name) in header.iter().enumerate() {
            let name = name.trim().trim_start_matches('\u{feff}').to_lowercase();
            let name = if name == "event_timestamp" { "timestamp".to_string() } else { name };
            if let Some(slot) = SOURCE_COLUMNS.iter().position(|c| *c == name) {
                if positions[slot].is_none() {
                    positions[slot] = Some(idx);
                }
            }
        }
        Self { positions }
    }

    fn first_missing(&self) -> Option<&'static str> {
        SOURCE_COLUMNS
            .iter()
            .zip(self.positions.iter())
            .find(|(_, pos)| pos.is_none())
            .map(|(name, _)| *name)
    }

    fn extract(&self, fields: &[String]) -> RawRecord {
        let get = |slot: usize| self.positions[slot].and_then(|idx| fields.get(idx).cloned());
        RawRecord {
            event_id: get(0),
            user_id: get(1),
            product_id: get(2),
            product_name: get(3),
            category: get(4),
            price: get(5),
            event_type: get(6),
            timestamp: get(7),
        }
    }
}

fn lossy_fields(record: &csv::ByteRecord) -> Vec<String> {
    record
        .iter()
        .map(|field| String::from_utf8_lossy(field).into_owned())
        .collect()
}

/// Non-blank physical lines with their 1-based numbers; `\r\n` is accepted
fn physical_lines(data: &[u8]) -> impl Iterator<Item = (u64, &[u8])> {
    data.split(|b| *b == b'\n')
        .enumerate()
        .map(|(idx, line)| (idx as u64 + 1, line.strip_suffix(b"\r").unwrap_or(line)))
        .filter(|(_, line)| !line.iter().all(u8::is_ascii_whitespace))
}

/// Parse one physical line as a CSV record
///
/// A record never continues onto the next line, so an odd number of quote
/// characters means an unterminated quoted field.
fn parse_line(line: &[u8]) -> Result<csv::ByteRecord, String> {
    if line.iter().filter(|b| **b == b'"').count() % 2 == 1 {
        return Err("unbalanced quote".to_string());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line);
    let mut record = csv::ByteRecord::new();
    match reader.read_byte_record(&mut record) {
        Ok(_) => Ok(record),
        Err(e) => Err(e.to_string()),
    }
}

fn malformed(line: u64, detail: String) -> SourceRow {
    SourceRow {
        line,
        raw: RawRecord::default(),
        defect: Some(RowDefect {
            reason: RejectReason::MalformedRow,
            detail,
        }),
    }
}

/// Decode one file's content
///
/// The first non-blank line is the header and every later non-blank line is
/// exactly one row, whatever its quoting. Rows may have fewer or more fields
/// than the header; missing fields surface later as `MissingField`, extra
/// fields are ignored.
pub fn read_rows(data: &[u8]) -> Vec<SourceRow> {
    let mut lines = physical_lines(data);
    let Some((_, header_line)) = lines.next() else {
        return Vec::new();
    };

    let columns = match parse_line(header_line) {
        Ok(header) => ColumnMap::from_header(&lossy_fields(&header)),
        Err(e) => {
            return lines
                .map(|(line, _)| malformed(line, format!("unreadable header: {}", e)))
                .collect()
        },
    };
    let missing_column = columns.first_missing();

    lines
        .map(|(line, bytes)| {
            let record = match parse_line(bytes) {
                Ok(record) => record,
                Err(e) => return malformed(line, e),
            };

            let (fields, utf8_error) = match csv::StringRecord::from_byte_record(record.clone()) {
                Ok(r) => (r.iter().map(str::to_string).collect::<Vec<_>>(), None),
                Err(e) => (lossy_fields(&record), Some(e.utf8_error().to_string())),
            };
            let raw = columns.extract(&fields);

            let defect = if let Some(err) = utf8_error {
                Some(RowDefect {
                    reason: RejectReason::MalformedRow,
                    detail: format!("invalid UTF-8: {}", err),
                })
            } else {
                missing_column.map(|column| RowDefect {
                    reason: RejectReason::MissingField,
                    detail: format!("{} (absent from header)", column),
                })
            };

            SourceRow { line, raw, defect }
        })
        .collect()
}
