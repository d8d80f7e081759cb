use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hassprint_core::commands::{Axis, JogRequest};
use hassprint_core::printer::{ConnectionState, PrinterControl, PrinterError};
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::OctoPrintConfig;

const API_KEY_HEADER: &str = "X-Api-Key";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// REST client for an OctoPrint server. The latest push-socket snapshot is
/// cached here so status requests do not hit the server.
#[derive(Clone)]
pub struct OctoPrintClient {
    http: reqwest::Client,
    config: Arc<OctoPrintConfig>,
    snapshot: Arc<RwLock<Option<Value>>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub name: String,
    pub session: String,
}

#[derive(Debug, Deserialize)]
struct ConnectionResponse {
    current: ConnectionCurrent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionCurrent {
    state: String,
    port: Option<String>,
    baudrate: Option<u32>,
    printer_profile: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProfilesResponse {
    profiles: Map<String, Value>,
}

fn request_error(err: reqwest::Error) -> PrinterError {
    PrinterError::Request(err.to_string())
}

impl OctoPrintClient {
    pub fn new(config: OctoPrintConfig) -> Result<Self, PrinterError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("hassprint/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT.min(config.request_timeout))
            .timeout(config.request_timeout)
            .build()
            .map_err(request_error)?;
        Ok(Self {
            http,
            config: Arc::new(config),
            snapshot: Arc::new(RwLock::new(None)),
        })
    }

    pub fn config(&self) -> &OctoPrintConfig {
        &self.config
    }

    pub async fn store_snapshot(&self, snapshot: Value) {
        *self.snapshot.write().await = Some(snapshot);
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, PrinterError> {
        let url = self
            .config
            .endpoint(path)
            .map_err(|e| PrinterError::Request(e.to_string()))?;
        let mut builder = self.http.request(method, url);
        if let Some(key) = &self.config.api_key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        Ok(builder)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, PrinterError> {
        let response = builder.send().await.map_err(request_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(PrinterError::Rejected { status: status.as_u16(), message })
    }

    async fn post(&self, path: &str, body: Value) -> Result<(), PrinterError> {
        debug!(path, %body, "OctoPrint POST");
        let builder = self.request(Method::POST, path)?.json(&body);
        self.send(builder).await.map(|_| ())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, PrinterError> {
        let builder = self.request(Method::GET, path)?;
        self.send(builder)
            .await?
            .json::<T>()
            .await
            .map_err(|e| PrinterError::Decode(e.to_string()))
    }

    /// Passive login with the API key; the session authenticates the push socket.
    pub(crate) async fn login(&self) -> Result<LoginResponse, PrinterError> {
        let builder = self.request(Method::POST, "api/login")?.json(&json!({ "passive": true }));
        self.send(builder)
            .await?
            .json::<LoginResponse>()
            .await
            .map_err(|e| PrinterError::Decode(e.to_string()))
    }

    // Used until the push socket has delivered its first `current` message.
    async fn snapshot_from_job(&self) -> Result<Value, PrinterError> {
        let job: Value = self.get_json("api/job").await?;
        let state_text = job.get("state").cloned().unwrap_or(Value::Null);
        Ok(json!({
            "state": { "text": state_text },
            "job": job.get("job").cloned().unwrap_or_else(|| json!({})),
            "progress": job.get("progress").cloned().unwrap_or_else(|| json!({})),
            "currentZ": Value::Null,
        }))
    }
}

pub(crate) fn jog_body(request: &JogRequest) -> Value {
    let mut body = Map::new();
    body.insert("command".into(), json!("jog"));
    for (axis, distance) in &request.axes {
        body.insert(axis.as_str().into(), json!(distance));
    }
    if let Some(speed) = request.speed {
        body.insert("speed".into(), json!(speed));
    }
    Value::Object(body)
}

/// The REST home command only takes x, y and z; `None` when nothing remains.
pub(crate) fn home_body(axes: &[Axis]) -> Option<Value> {
    let (homeable, skipped): (Vec<Axis>, Vec<Axis>) = axes.iter().copied().partition(|a| *a != Axis::E);
    if !skipped.is_empty() {
        debug!(?skipped, "Extruder axis cannot be homed; dropping it");
    }
    if homeable.is_empty() {
        return None;
    }
    Some(json!({ "command": "home", "axes": homeable }))
}

pub(crate) fn active_extruder_count(profiles: &Map<String, Value>) -> Option<usize> {
    let flagged = |flag: &str| {
        profiles
            .values()
            .find(|p| p.get(flag).and_then(Value::as_bool).unwrap_or(false))
    };
    let profile = flagged("current").or_else(|| flagged("default"))?;
    profile
        .get("extruder")
        .and_then(|e| e.get("count"))
        .and_then(Value::as_u64)
        .map(|n| n as usize)
}

#[async_trait]
impl PrinterControl for OctoPrintClient {
    async fn commands(&self, commands: &[String]) -> Result<(), PrinterError> {
        self.post("api/printer/command", json!({ "commands": commands })).await
    }

    async fn home(&self, axes: &[Axis]) -> Result<(), PrinterError> {
        match home_body(axes) {
            Some(body) => self.post("api/printer/printhead", body).await,
            None => {
                warn!(?axes, "No homeable axis requested; nothing sent");
                Ok(())
            }
        }
    }

    async fn jog(&self, request: &JogRequest) -> Result<(), PrinterError> {
        self.post("api/printer/printhead", jog_body(request)).await
    }

    async fn pause_print(&self) -> Result<(), PrinterError> {
        self.post("api/job", json!({ "command": "pause", "action": "pause" })).await
    }

    async fn resume_print(&self) -> Result<(), PrinterError> {
        self.post("api/job", json!({ "command": "pause", "action": "resume" })).await
    }

    async fn cancel_print(&self) -> Result<(), PrinterError> {
        self.post("api/job", json!({ "command": "cancel" })).await
    }

    async fn get_current_data(&self) -> Result<Value, PrinterError> {
        if let Some(snapshot) = self.snapshot.read().await.clone() {
            return Ok(snapshot);
        }
        self.snapshot_from_job().await
    }

    async fn get_current_connection(&self) -> Result<ConnectionState, PrinterError> {
        let response: ConnectionResponse = self.get_json("api/connection").await?;
        Ok(ConnectionState {
            state: response.current.state,
            port: response.current.port,
            baudrate: response.current.baudrate,
            profile: response.current.printer_profile,
        })
    }

    async fn extruder_count(&self) -> Result<usize, PrinterError> {
        let response: ProfilesResponse = self.get_json("api/printerprofiles").await?;
        active_extruder_count(&response.profiles)
            .ok_or_else(|| PrinterError::Decode("no current printer profile".to_string()))
    }

    async fn shutdown_host(&self) -> Result<(), PrinterError> {
        let builder = self.request(Method::POST, "api/system/commands/core/shutdown")?;
        self.send(builder).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn jog_body_flattens_axes() {
        let request = JogRequest {
            axes: BTreeMap::from([(Axis::X, 5.0), (Axis::Z, -1.0)]),
            speed: Some(100.0),
        };
        assert_eq!(jog_body(&request), json!({"command": "jog", "x": 5.0, "z": -1.0, "speed": 100.0}));
    }

    #[test]
    fn home_body_drops_extruder_axis() {
        assert_eq!(
            home_body(&[Axis::X, Axis::E, Axis::Z]),
            Some(json!({"command": "home", "axes": ["x", "z"]}))
        );
        assert_eq!(home_body(&[Axis::E]), None);
        assert_eq!(home_body(&[]), None);
    }

    #[tokio::test]
    async fn unresponsive_host_times_out() {
        // Accepts connections but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let held = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });

        let client = OctoPrintClient::new(OctoPrintConfig {
            base_url: url::Url::parse(&format!("http://{addr}/")).unwrap(),
            api_key: None,
            request_timeout: Duration::from_millis(200),
        })
        .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), client.get_current_connection())
            .await
            .expect("client call should give up on its own");
        assert!(matches!(outcome, Err(PrinterError::Request(_))));

        let outcome = tokio::time::timeout(Duration::from_secs(5), client.extruder_count()).await;
        assert!(matches!(outcome, Ok(Err(PrinterError::Request(_)))));
        held.abort();
    }

    #[test]
    fn extruder_count_prefers_current_profile() {
        let profiles = json!({
            "_default": {"default": true, "current": false, "extruder": {"count": 1}},
            "dual": {"default": false, "current": true, "extruder": {"count": 2}}
        });
        let Value::Object(map) = profiles else { unreachable!() };
        assert_eq!(active_extruder_count(&map), Some(2));
    }

    #[test]
    fn extruder_count_falls_back_to_default() {
        let profiles = json!({"_default": {"default": true, "extruder": {"count": 1}}});
        let Value::Object(map) = profiles else { unreachable!() };
        assert_eq!(active_extruder_count(&map), Some(1));
        assert_eq!(active_extruder_count(&Map::new()), None);
    }
}
