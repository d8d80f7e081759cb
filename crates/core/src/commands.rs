use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Raw command sent for an emergency stop.
pub const EMERGENCY_STOP: &str = "M112";

/// Control topics the bridge listens on, one per suffix of `controlTopic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    Stop,
    Cancel,
    Pause,
    Shutdown,
    Jog,
    Home,
    Commands,
}

impl ControlKind {
    pub const ALL: [ControlKind; 7] = [
        ControlKind::Stop,
        ControlKind::Cancel,
        ControlKind::Pause,
        ControlKind::Shutdown,
        ControlKind::Jog,
        ControlKind::Home,
        ControlKind::Commands,
    ];

    pub fn topic_suffix(self) -> &'static str {
        match self {
            ControlKind::Stop => "stop",
            ControlKind::Cancel => "cancel",
            ControlKind::Pause => "pause",
            ControlKind::Shutdown => "shutdown",
            ControlKind::Jog => "jog",
            ControlKind::Home => "home",
            ControlKind::Commands => "commands",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
    E,
}

impl Axis {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "x" => Some(Axis::X),
            "y" => Some(Axis::Y),
            "z" => Some(Axis::Z),
            "e" => Some(Axis::E),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
            Axis::E => "e",
        }
    }

    pub fn is_jog_axis(self) -> bool {
        self != Axis::E
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct JogRequest {
    pub axes: BTreeMap<Axis, f64>,
    pub speed: Option<f64>,
}

/// A decoded inbound control message.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    EmergencyStop,
    Cancel,
    Pause,
    Resume,
    Shutdown,
    Home(Vec<Axis>),
    Jog(JogRequest),
    Raw(Vec<String>),
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("'{0}' is not a boolean payload")]
    NotBoolean(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),
    #[error("expected a JSON {expected}, got {found}")]
    UnexpectedShape { expected: &'static str, found: &'static str },
    #[error("axis '{axis}' needs a numeric distance")]
    NonNumericAxis { axis: &'static str },
    #[error("speed must be numeric")]
    NonNumericSpeed,
}

/// Decodes a control payload. `Ok(None)` means the message asks for nothing
/// (a falsy switch payload, an empty body).
pub fn decode(kind: ControlKind, payload: &[u8]) -> Result<Option<Command>, CommandError> {
    let text = std::str::from_utf8(payload).map_err(|_| CommandError::NotUtf8)?;
    match kind {
        ControlKind::Stop => Ok(parse_bool(text)?.then_some(Command::EmergencyStop)),
        ControlKind::Cancel => Ok(parse_bool(text)?.then_some(Command::Cancel)),
        ControlKind::Shutdown => Ok(parse_bool(text)?.then_some(Command::Shutdown)),
        ControlKind::Pause => Ok(Some(if parse_bool(text)? { Command::Pause } else { Command::Resume })),
        ControlKind::Home => {
            if text.trim().is_empty() {
                return Ok(None);
            }
            let axes = home_axes(text)?;
            Ok((!axes.is_empty()).then_some(Command::Home(axes)))
        }
        ControlKind::Jog => {
            if text.trim().is_empty() {
                return Ok(None);
            }
            Ok(Some(Command::Jog(jog_request(text)?)))
        }
        ControlKind::Commands => {
            let lines: Vec<String> = text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect();
            Ok((!lines.is_empty()).then_some(Command::Raw(lines)))
        }
    }
}

pub fn parse_bool(text: &str) -> Result<bool, CommandError> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" | "" => Ok(false),
        _ => Err(CommandError::NotBoolean(text.to_string())),
    }
}

fn parse_json(text: &str) -> Result<Value, CommandError> {
    serde_json::from_str(text).map_err(|e| CommandError::InvalidJson(e.to_string()))
}

fn shape(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Axis keys of an object (or axis names of an array), in x, y, z, e order.
pub fn home_axes(text: &str) -> Result<Vec<Axis>, CommandError> {
    let json = parse_json(text)?;
    let mut axes: Vec<Axis> = match &json {
        Value::Object(map) => map.keys().filter_map(|k| Axis::from_key(k)).collect(),
        Value::Array(items) => items.iter().filter_map(Value::as_str).filter_map(Axis::from_key).collect(),
        other => {
            return Err(CommandError::UnexpectedShape { expected: "object", found: shape(other) });
        }
    };
    axes.sort();
    axes.dedup();
    Ok(axes)
}

/// `x`/`y`/`z` distances plus optional `speed`; other keys are ignored.
pub fn jog_request(text: &str) -> Result<JogRequest, CommandError> {
    let json = parse_json(text)?;
    let Value::Object(map) = json else {
        return Err(CommandError::UnexpectedShape { expected: "object", found: shape(&json) });
    };

    let mut request = JogRequest::default();
    for (key, value) in &map {
        let Some(axis) = Axis::from_key(key).filter(|a| a.is_jog_axis()) else {
            continue;
        };
        let distance = value
            .as_f64()
            .ok_or(CommandError::NonNumericAxis { axis: axis.as_str() })?;
        request.axes.insert(axis, distance);
    }
    request.speed = match map.get("speed") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_f64().ok_or(CommandError::NonNumericSpeed)?),
    };
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_keeps_only_known_axes() {
        let cmd = decode(ControlKind::Home, br#"{"y":2,"foo":3,"x":1}"#).unwrap();
        assert_eq!(cmd, Some(Command::Home(vec![Axis::X, Axis::Y])));
        let cmd = decode(ControlKind::Home, br#"{"x":1,"y":2,"foo":3}"#).unwrap();
        assert_eq!(cmd, Some(Command::Home(vec![Axis::X, Axis::Y])));
    }

    #[test]
    fn home_accepts_axis_list() {
        let cmd = decode(ControlKind::Home, br#"["z","e","z"]"#).unwrap();
        assert_eq!(cmd, Some(Command::Home(vec![Axis::Z, Axis::E])));
    }

    #[test]
    fn home_without_axes_is_noop() {
        assert_eq!(decode(ControlKind::Home, br#"{"foo":1}"#).unwrap(), None);
        assert_eq!(decode(ControlKind::Home, b"").unwrap(), None);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(decode(ControlKind::Home, b"{x:"), Err(CommandError::InvalidJson(_))));
        assert!(matches!(decode(ControlKind::Jog, b"[1,2]"), Err(CommandError::UnexpectedShape { .. })));
        assert_eq!(
            decode(ControlKind::Jog, br#"{"x":"far"}"#),
            Err(CommandError::NonNumericAxis { axis: "x" })
        );
    }

    #[test]
    fn jog_filters_axes_and_keeps_speed() {
        let cmd = decode(ControlKind::Jog, br#"{"x":5,"z":-1,"bogus":true,"speed":100}"#).unwrap();
        let Some(Command::Jog(req)) = cmd else { panic!("jog expected") };
        assert_eq!(req.axes, BTreeMap::from([(Axis::X, 5.0), (Axis::Z, -1.0)]));
        assert_eq!(req.speed, Some(100.0));
    }

    #[test]
    fn jog_ignores_extruder_axis() {
        let Some(Command::Jog(req)) = decode(ControlKind::Jog, br#"{"e":5,"y":1}"#).unwrap() else {
            panic!("jog expected")
        };
        assert_eq!(req.axes, BTreeMap::from([(Axis::Y, 1.0)]));
        assert_eq!(req.speed, None);
    }

    #[test]
    fn switches_follow_boolean_payloads() {
        assert_eq!(decode(ControlKind::Stop, b"True").unwrap(), Some(Command::EmergencyStop));
        assert_eq!(decode(ControlKind::Stop, b"False").unwrap(), None);
        assert_eq!(decode(ControlKind::Cancel, b"on").unwrap(), Some(Command::Cancel));
        assert_eq!(decode(ControlKind::Pause, b"True").unwrap(), Some(Command::Pause));
        assert_eq!(decode(ControlKind::Pause, b"False").unwrap(), Some(Command::Resume));
        assert_eq!(decode(ControlKind::Shutdown, b" 1 ").unwrap(), Some(Command::Shutdown));
        assert!(matches!(decode(ControlKind::Stop, b"maybe"), Err(CommandError::NotBoolean(_))));
    }

    #[test]
    fn raw_commands_are_split_per_line() {
        let cmd = decode(ControlKind::Commands, b"G28\n\nM104 S200\n").unwrap();
        assert_eq!(cmd, Some(Command::Raw(vec!["G28".into(), "M104 S200".into()])));
        assert_eq!(decode(ControlKind::Commands, b"  ").unwrap(), None);
    }
}
