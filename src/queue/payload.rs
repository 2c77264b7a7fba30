//! # Upload Payload
//!
//! Turns a queued record into the shadow document that gets submitted.
//!
//! Each body line is `<timestamp> <field> <mac> [...]`. Only the first and
//! third fields are kept and re-joined as CSV under the `timestamp,mac` header:
//!
//! ```
//! use shadow_uplink::queue::payload::UploadPayload;
//!
//! let payload = UploadPayload::from_body(
//!     "1670000000.txt",
//!     "1670000000",
//!     "1670000000 0 AA:BB:CC:DD:EE:FF\n",
//! ).unwrap();
//! assert_eq!(payload.data(), "timestamp,mac\n1670000000,AA:BB:CC:DD:EE:FF\n");
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

use super::PendingRecord;
use crate::error::{Result, UplinkError};

/// CSV header prepended to every payload
pub const PAYLOAD_HEADER: &str = "timestamp,mac";

/// Minimum whitespace-separated fields per record line
pub const MIN_FIELDS: usize = 3;

/// Transient CSV payload built from one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPayload {
    timestamp: String,
    data: String,
}

impl UploadPayload {
    /// Build the payload for a queued record
    ///
    /// # Errors
    ///
    /// - `Io` if the record cannot be read
    /// - `Encoding` if the record is not UTF-8 text
    /// - `DataFormat` if any line has fewer than 3 fields
    pub fn build(record: &PendingRecord) -> Result<Self> {
        let body = match record.read_body() {
            Ok(body) => body,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(UplinkError::Encoding {
                    path: record.source_path().to_path_buf(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_body(record.source_path(), record.record_timestamp(), &body)
    }

    /// Build a payload from an already-read body
    ///
    /// Every line must carry at least 3 fields; blank lines included. A bad
    /// line is rejected rather than dropped.
    pub fn from_body(path: impl AsRef<Path>, timestamp: &str, body: &str) -> Result<Self> {
        let mut data = String::with_capacity(body.len());
        data.push_str(PAYLOAD_HEADER);
        data.push('\n');

        for (index, line) in body.lines().enumerate() {
            let row = transform_line(line).ok_or_else(|| UplinkError::DataFormat {
                path: path.as_ref().to_path_buf(),
                line: index + 1,
                tokens: line.split_whitespace().count(),
            })?;
            data.push_str(&row);
            data.push('\n');
        }

        Ok(Self {
            timestamp: timestamp.to_string(),
            data,
        })
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    /// Wrap the payload into a shadow `reported` state document
    pub fn into_document(self) -> ShadowDocument {
        ShadowDocument {
            state: ShadowState {
                reported: ReportedState {
                    timestamp: self.timestamp,
                    data: self.data,
                },
            },
        }
    }
}

/// Convert one record line into a `timestamp,mac` row
///
/// Returns `None` if the line has fewer than 3 fields.
pub fn transform_line(line: &str) -> Option<String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < MIN_FIELDS {
        return None;
    }
    Some(format!("{},{}", fields[0], fields[2]))
}

/// `{"state": {"reported": {"timestamp": .., "data": ..}}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowDocument {
    pub state: ShadowState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowState {
    pub reported: ReportedState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedState {
    pub timestamp: String,
    pub data: String,
}

impl ShadowDocument {
    pub fn timestamp(&self) -> &str {
        &self.state.reported.timestamp
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
