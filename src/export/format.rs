//! Row encoders for the three export formats.

use serde_json::Value;

use crate::configuration::types::ExportFormat;
use crate::error_handling::types::ExportError;

use super::fields::{value_text, FieldMap};

/// Line written before any record, if the format has one.
pub fn header_line(format: ExportFormat, columns: &[String]) -> Option<String> {
    match format {
        ExportFormat::Csv => Some(
            columns
                .iter()
                .map(|c| csv_escape(c))
                .collect::<Vec<_>>()
                .join(","),
        ),
        ExportFormat::Json | ExportFormat::Txt => None,
    }
}

/// One record as a single line, columns in order. Columns the record does
/// not carry are left empty (CSV) or skipped (JSON, TXT).
pub fn record_line(
    format: ExportFormat,
    columns: &[String],
    fields: &FieldMap,
) -> Result<String, ExportError> {
    match format {
        ExportFormat::Csv => Ok(columns
            .iter()
            .map(|c| csv_escape(&value_text(fields.get(c))))
            .collect::<Vec<_>>()
            .join(",")),
        ExportFormat::Json => {
            let mut object = serde_json::Map::new();
            for column in columns {
                if let Some(value) = fields.get(column) {
                    object.insert(column.clone(), value.clone());
                }
            }
            Ok(serde_json::to_string(&Value::Object(object))?)
        }
        ExportFormat::Txt => Ok(columns
            .iter()
            .filter_map(|c| fields.get(c).map(|v| format!("{}={}", c, value_text(Some(v)))))
            .collect::<Vec<_>>()
            .join(" ")),
    }
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
