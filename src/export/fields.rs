//! Flat field view of an event.
//!
//! Records are nested structs. Exporters want flat `name -> value` rows, so
//! every leaf is named by its dotted path inside the payload (`loss.reason`,
//! `tcp.srtt_us`, `sample.rtt_us`). Header fields and the payload kind keep
//! their bare names.

use log::warn;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::attribution::rtt_estimator::RttSample;
use crate::error_handling::types::ExportError;
use crate::events::record::Event;
use crate::host::accessor::HostLayout;
use crate::host::snapshot::SockSnapshot;
use crate::probes::ProbeVariant;
use crate::session_management::session::{Session, VariantState};

/// Fields every row starts with, in this order.
pub const HEADER_FIELDS: [&str; 5] = ["ev_tstamp_ns", "conn_tstamp_ns", "src", "dst", "kind"];

pub type FieldMap = Map<String, Value>;

pub fn flatten(event: &Event) -> Result<FieldMap, ExportError> {
    let mut fields = FieldMap::new();
    match serde_json::to_value(event)? {
        Value::Object(root) => {
            // Header and payload are namespaces, not path components.
            for (_, value) in root {
                flatten_into(&mut fields, "", value);
            }
        }
        other => {
            return Err(ExportError::SerializeFailed(format!(
                "event serialized to {} instead of an object",
                other
            )))
        }
    }
    Ok(fields)
}

fn flatten_into(fields: &mut FieldMap, prefix: &str, value: Value) {
    match value {
        Value::Object(map) => {
            for (key, value) in map {
                let path = if prefix.is_empty() {
                    key
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(fields, &path, value);
            }
        }
        leaf => {
            fields.insert(prefix.to_string(), leaf);
        }
    }
}

/// Textual form used by the CSV and TXT encoders. Missing and null values
/// are empty.
pub fn value_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Representative record of `variant` with every optional section filled.
fn template(variant: ProbeVariant) -> Event {
    let sk = SockSnapshot::default();
    let session = Session::establish(variant, &sk, sk.src, sk.dst);
    match session.state {
        VariantState::RttTrace(track) => {
            Event::rtt_sample(&sk, &session, &track, RttSample::default())
        }
        _ => Event::terminal(HostLayout::default(), &sk, &session),
    }
}

/// Every stat field a `variant` record carries, sorted.
pub fn stat_field_names(variant: ProbeVariant) -> Result<Vec<String>, ExportError> {
    let fields = flatten(&template(variant))?;
    Ok(fields
        .keys()
        .filter(|name| !HEADER_FIELDS.contains(&name.as_str()))
        .cloned()
        .collect())
}

/// Resolves the requested stat fields against what `variant` records carry.
/// Unknown names are warned about and dropped. `None` selects every field.
pub fn select_stat_fields(
    variant: ProbeVariant,
    requested: Option<&[String]>,
) -> Result<Vec<String>, ExportError> {
    let available = stat_field_names(variant)?;
    let Some(requested) = requested else {
        return Ok(available);
    };
    let known: BTreeSet<&str> = available.iter().map(String::as_str).collect();
    let mut selected = Vec::with_capacity(requested.len());
    for name in requested {
        if known.contains(name.as_str()) {
            if !selected.contains(name) {
                selected.push(name.clone());
            }
        } else {
            warn!(
                "Cannot export stat field {}, {} records have no such field, ignoring it",
                name, variant
            );
        }
    }
    Ok(selected)
}
