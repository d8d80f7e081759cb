// Printer status snapshot augmentation: human-readable durations next to the
// raw second counts.

use serde_json::{Map, Value};

/// `(section, source field, formatted field)` triples added to every snapshot.
pub const FORMATTED_DURATIONS: [(&str, &str, &str); 3] = [
    ("progress", "printTime", "printTimeFormatted"),
    ("progress", "printTimeLeft", "printTimeLeftFormatted"),
    ("job", "estimatedPrintTime", "estimatedPrintTimeFormatted"),
];

/// Elapsed-duration rendering in `H:MM:SS`, with a `N day(s), ` prefix past
/// 24 hours. Fractions of a second are dropped.
pub fn format_duration(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let rem = total_secs % 86_400;
    let clock = format!("{}:{:02}:{:02}", rem / 3600, (rem % 3600) / 60, rem % 60);
    match days {
        0 => clock,
        1 => format!("1 day, {clock}"),
        n => format!("{n} days, {clock}"),
    }
}

/// Whole seconds from a JSON duration field. Negative, non-finite and
/// non-numeric values are rejected.
pub fn duration_secs(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Some(u)
            } else {
                let f = n.as_f64()?;
                (f.is_finite() && f >= 0.0).then(|| f.trunc() as u64)
            }
        }
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn formatted(section: Option<&Value>, field: &str) -> Value {
    section
        .and_then(|s| s.get(field))
        .and_then(duration_secs)
        .map(|secs| Value::String(format_duration(secs)))
        .unwrap_or(Value::Null)
}

/// Adds the formatted duration fields in place. A missing or invalid source
/// yields `null` for that field only; missing sections are created.
pub fn augment_snapshot(snapshot: &mut Map<String, Value>) {
    for (section, field, target) in FORMATTED_DURATIONS {
        let value = formatted(snapshot.get(section), field);
        let entry = snapshot
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(obj) = entry {
            obj.insert(target.to_string(), value);
        }
    }
}
