//! Export formats

use super::event::AuditEvent;
use crate::error::{Result, VigilError};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Column order of CSV exports
pub const CSV_HEADER: [&str; 7] = [
    "id",
    "timestamp",
    "event_type",
    "actor",
    "action",
    "resource",
    "metadata",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Pretty-printed JSON array
    Json,
    /// One row per event under [`CSV_HEADER`]
    Csv,
    /// Recognised, not implemented
    Xml,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Xml => "xml",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "xml" => Ok(ExportFormat::Xml),
            other => Err(VigilError::ExportFormatUnsupported(other.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialize events in the requested format
pub fn export_events(events: &[AuditEvent], format: ExportFormat) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_vec_pretty(events)?),
        ExportFormat::Csv => export_csv(events),
        ExportFormat::Xml => Err(VigilError::ExportFormatUnsupported(
            ExportFormat::Xml.to_string(),
        )),
    }
}

fn export_csv(events: &[AuditEvent]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;

    for event in events {
        let id = event.id.to_string();
        let timestamp = event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
        let metadata = serde_json::to_string(&event.metadata)?;
        writer.write_record([
            id.as_str(),
            timestamp.as_str(),
            event.event_type.as_str(),
            event.actor.as_str(),
            event.action.as_str(),
            event.resource.as_str(),
            metadata.as_str(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| VigilError::Serialization(format!("csv: {}", e.error())))
}
