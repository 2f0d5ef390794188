//! One JSON object per line, as written by nginx `log_format ... escape=json`

use indexmap::IndexMap;
use serde_json::Value;

use super::FieldMatch;

pub const JSON_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Length of `YYYY-MM-DDTHH:MM:SS`; anything after it is the offset
const ISO_DATE_LEN: usize = 19;

#[derive(Debug, Clone)]
pub struct JsonFormat {
    name: String,
}

impl JsonFormat {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Match a line that is a JSON object; score is its number of top-level keys
    pub fn matches_line(&self, line: &str) -> Option<FieldMatch> {
        let Value::Object(object) = serde_json::from_str::<Value>(line.trim()).ok()? else {
            return None;
        };
        let score = object.len();

        let mut fields = IndexMap::with_capacity(object.len());
        for (key, value) in object {
            let text = match value {
                Value::Null => continue,
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                nested => nested.to_string(),
            };
            fields.insert(key, text);
        }

        normalize_date(&mut fields);
        normalize_generation_time(&mut fields);

        Some(FieldMatch::with_score(fields, score))
    }
}

// ISO 8601 `2024-01-01T10:00:00+02:00` -> date + `+0200` timezone
fn normalize_date(fields: &mut IndexMap<String, String>) {
    let Some(date) = fields.get("date").cloned() else {
        return;
    };
    if date.len() <= ISO_DATE_LEN || !date.is_char_boundary(ISO_DATE_LEN) {
        return;
    }
    let (stamp, offset) = date.split_at(ISO_DATE_LEN);
    let offset = offset.replace(':', "");
    fields.insert("date".to_string(), stamp.to_string());
    if !offset.is_empty() && offset != "Z" {
        fields.insert("timezone".to_string(), offset);
    }
}

// nginx `$request_time` is in seconds with millisecond resolution
fn normalize_generation_time(fields: &mut IndexMap<String, String>) {
    if let Some(value) = fields.get_mut("generation_time_milli") {
        if let Ok(secs) = value.parse::<f64>() {
            *value = ((secs * 1000.0) as i64).to_string();
        }
    }
}
