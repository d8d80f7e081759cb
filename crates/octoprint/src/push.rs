use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hassprint_core::PrinterError;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::client::OctoPrintClient;

// Sections of a `current` message that do not belong in the status snapshot.
const VOLATILE_SECTIONS: [&str; 4] = ["temps", "logs", "messages", "busyFiles"];

#[derive(Debug, Error)]
pub enum PushError {
    #[error("login failed: {0}")]
    Login(#[from] PrinterError),
    #[error("invalid push socket URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("push socket error: {0}")]
    Socket(#[from] tungstenite::Error),
    #[error("push socket handshake timed out")]
    Timeout,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostUpdate {
    /// A lifecycle event as named by the host, with its payload object.
    Event { name: String, payload: Value },
    Progress { path: Option<String>, location: Option<String>, completion: u8 },
    Temperature { sensor: String, actual: Option<f64>, target: Option<f64> },
}

impl HostUpdate {
    pub fn progress_payload(&self) -> Option<Value> {
        match self {
            HostUpdate::Progress { path, location, completion } => {
                Some(json!({ "progress": completion, "path": path, "location": location }))
            }
            _ => None,
        }
    }
}

/// Turns successive `current` messages into change notifications.
#[derive(Debug, Default)]
pub struct CurrentTracker {
    completion: Option<u8>,
    temperatures: BTreeMap<String, (Option<f64>, Option<f64>)>,
}

fn round_tenth(v: Option<f64>) -> Option<f64> {
    v.map(|t| (t * 10.0).round() / 10.0)
}

impl CurrentTracker {
    pub fn observe(&mut self, current: &Value) -> Vec<HostUpdate> {
        let mut updates = Vec::new();

        let completion = current
            .pointer("/progress/completion")
            .and_then(Value::as_f64)
            .map(|c| c.clamp(0.0, 100.0).floor() as u8);
        if completion.is_some() && completion != self.completion {
            let file = current.pointer("/job/file");
            let field = |key: &str| file.and_then(|f| f.get(key)).and_then(Value::as_str).map(str::to_string);
            updates.push(HostUpdate::Progress {
                path: field("path"),
                location: field("origin"),
                completion: completion.unwrap_or_default(),
            });
        }
        self.completion = completion;

        // `temps` is a short history; only the newest sample matters
        let latest = current
            .get("temps")
            .and_then(Value::as_array)
            .and_then(|history| history.last())
            .and_then(Value::as_object);
        if let Some(sample) = latest {
            for (sensor, reading) in sample.iter().filter(|(k, _)| k.as_str() != "time") {
                let actual = round_tenth(reading.get("actual").and_then(Value::as_f64));
                let target = round_tenth(reading.get("target").and_then(Value::as_f64));
                if self.temperatures.get(sensor) == Some(&(actual, target)) {
                    continue;
                }
                self.temperatures.insert(sensor.clone(), (actual, target));
                updates.push(HostUpdate::Temperature { sensor: sensor.clone(), actual, target });
            }
        }

        updates
    }
}

/// Copy of a `current` message suitable as the status snapshot.
pub fn snapshot_of(current: &Value) -> Value {
    match current {
        Value::Object(map) => {
            let kept: Map<String, Value> = map
                .iter()
                .filter(|(k, _)| !VOLATILE_SECTIONS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(kept)
        }
        other => other.clone(),
    }
}

/// Parses one push-socket frame into the current message and/or an event.
fn classify(frame: &Value) -> (Option<&Value>, Option<HostUpdate>) {
    let Some(obj) = frame.as_object() else { return (None, None) };
    if let Some(current) = obj.get("current").or_else(|| obj.get("history")) {
        return (Some(current), None);
    }
    if let Some(event) = obj.get("event") {
        let Some(name) = event.get("type").and_then(Value::as_str) else { return (None, None) };
        let payload = match event.get("payload") {
            Some(p @ Value::Object(_)) => p.clone(),
            _ => json!({}),
        };
        return (None, Some(HostUpdate::Event { name: name.to_string(), payload }));
    }
    (None, None)
}

/// Follows the push socket until the receiving side is dropped, reconnecting
/// with backoff whenever the session ends.
pub async fn run_push_listener(client: OctoPrintClient, tx: mpsc::Sender<HostUpdate>) {
    let mut backoff_secs = 1u64;
    loop {
        if tx.is_closed() {
            return;
        }
        match listen_once(&client, &tx).await {
            Ok(()) => {
                info!("OctoPrint push socket closed");
                backoff_secs = 1;
            }
            Err(err) => warn!(%err, "OctoPrint push socket failed"),
        }
        sleep(Duration::from_secs(backoff_secs)).await;
        backoff_secs = (backoff_secs * 2).min(60);
    }
}

async fn listen_once(client: &OctoPrintClient, tx: &mpsc::Sender<HostUpdate>) -> Result<(), PushError> {
    let login = client.login().await?;
    let url = client.config().push_url()?;
    let (stream, _) = timeout(client.config().request_timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| PushError::Timeout)??;
    let (mut write, mut read) = stream.split();

    let auth = json!({ "auth": format!("{}:{}", login.name, login.session) });
    write.send(Message::Text(auth.to_string())).await?;
    info!(url = %url, "OctoPrint push socket connected");

    let mut tracker = CurrentTracker::default();
    while let Some(msg) = read.next().await {
        let text = match msg? {
            Message::Text(t) => t,
            Message::Ping(data) => {
                let _ = write.send(Message::Pong(data)).await;
                continue;
            }
            Message::Close(_) => break,
            other => {
                debug!(?other, "Ignoring non-text push frame");
                continue;
            }
        };
        let frame: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(err) => {
                debug!(?err, "Ignoring unparseable push frame");
                continue;
            }
        };

        let (current, event) = classify(&frame);
        let mut updates = Vec::new();
        if let Some(current) = current {
            client.store_snapshot(snapshot_of(current)).await;
            updates = tracker.observe(current);
        }
        updates.extend(event);
        for update in updates {
            if tx.send(update).await.is_err() {
                return Ok(());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current(completion: f64, tool0: f64) -> Value {
        json!({
            "state": {"text": "Printing"},
            "job": {"file": {"path": "benchy.gcode", "origin": "local"}},
            "progress": {"completion": completion},
            "temps": [
                {"time": 1, "tool0": {"actual": 20.0, "target": 0.0}},
                {"time": 2, "tool0": {"actual": tool0, "target": 210.0}, "bed": {"actual": 60.0, "target": 60.0}}
            ],
            "logs": ["Send: M105"],
        })
    }

    #[test]
    fn progress_reported_once_per_whole_percent() {
        let mut tracker = CurrentTracker::default();
        let first = tracker.observe(&current(12.2, 200.0));
        assert!(first.contains(&HostUpdate::Progress {
            path: Some("benchy.gcode".into()),
            location: Some("local".into()),
            completion: 12,
        }));
        let again = tracker.observe(&current(12.9, 200.0));
        assert!(again.is_empty());
        let next = tracker.observe(&current(13.0, 200.0));
        assert_eq!(next.len(), 1);
    }

    #[test]
    fn temperatures_use_latest_sample_and_ignore_noise() {
        let mut tracker = CurrentTracker::default();
        let first = tracker.observe(&current(0.0, 200.0));
        let sensors: Vec<_> = first
            .iter()
            .filter_map(|u| match u {
                HostUpdate::Temperature { sensor, .. } => Some(sensor.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(sensors, ["bed", "tool0"]);

        assert!(tracker.observe(&current(0.0, 200.01)).is_empty());
        let changed = tracker.observe(&current(0.0, 201.0));
        assert_eq!(
            changed,
            vec![HostUpdate::Temperature { sensor: "tool0".into(), actual: Some(201.0), target: Some(210.0) }]
        );
    }

    #[test]
    fn snapshot_strips_volatile_sections() {
        let snap = snapshot_of(&current(1.0, 1.0));
        assert!(snap.get("temps").is_none());
        assert!(snap.get("logs").is_none());
        assert_eq!(snap["state"]["text"], "Printing");
    }

    #[test]
    fn event_frames_become_host_updates() {
        let frame = json!({"event": {"type": "PrintStarted", "payload": {"name": "benchy.gcode"}}});
        let (current, event) = classify(&frame);
        assert!(current.is_none());
        assert_eq!(
            event,
            Some(HostUpdate::Event { name: "PrintStarted".into(), payload: json!({"name": "benchy.gcode"}) })
        );

        let bare = json!({"event": {"type": "Connected", "payload": null}});
        assert_eq!(classify(&bare).1, Some(HostUpdate::Event { name: "Connected".into(), payload: json!({}) }));
    }

    #[test]
    fn push_errors_name_their_stage() {
        let err: PushError = PrinterError::Rejected { status: 403, message: "Forbidden".into() }.into();
        assert!(matches!(err, PushError::Login(_)));
        assert!(err.to_string().starts_with("login failed"));

        let err: PushError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, PushError::Url(_)));

        let err: PushError = tungstenite::Error::ConnectionClosed.into();
        assert_eq!(err.to_string(), "push socket error: Connection closed normally");
    }

    #[test]
    fn progress_payload_shape() {
        let update = HostUpdate::Progress { path: Some("a.gcode".into()), location: None, completion: 40 };
        assert_eq!(update.progress_payload(), Some(json!({"progress": 40, "path": "a.gcode", "location": null})));
    }
}
