use std::sync::Arc;

use anyhow::Context as _;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dotenvy::dotenv;
use hassprint_bridge::{Bridge, BridgeConfig, Metrics, Transport};
use hassprint_core::discovery::{AVAILABLE, NOT_AVAILABLE};
use hassprint_core::{PrinterEvent, TopicTemplate};
use hassprint_mqtt::{MqttConfig, MqttEvent, MqttService};
use hassprint_octoprint::{run_push_listener, HostUpdate, OctoPrintClient, OctoPrintConfig};
use serde::Deserialize;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
struct AppState {
    mqtt: MqttService,
    bridge: Arc<Bridge>,
    metrics: Arc<Metrics>,
}

#[derive(Debug, Deserialize)]
struct EventRequest {
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let bridge_cfg = BridgeConfig::from_env();
    let settings = bridge_cfg
        .load_settings()
        .with_context(|| format!("failed to load node identity from {}", bridge_cfg.state_path.display()))?;

    // MQTT setup
    let availability_topic = settings.topics.full(TopicTemplate::LastWill, "");
    let mqtt_cfg = MqttConfig::from_env().with_availability(availability_topic, AVAILABLE, NOT_AVAILABLE);
    info!(host = %mqtt_cfg.host, port = mqtt_cfg.port, "Configuring MQTT client");
    let mqtt = MqttService::connect(mqtt_cfg)
        .await
        .context("failed to initialize MQTT")?;

    let octo_cfg = OctoPrintConfig::from_env();
    info!(url = %octo_cfg.base_url, "Configuring OctoPrint client");
    let octoprint = OctoPrintClient::new(octo_cfg).context("failed to build OctoPrint client")?;

    let metrics = Metrics::new().context("failed to register metrics")?;
    let bridge = Arc::new(Bridge::new(
        Transport::full(Arc::new(mqtt.clone())),
        Arc::new(octoprint.clone()),
        settings,
        metrics.clone(),
    ));

    // Subscribe before startup so no inbound message is missed.
    let mqtt_events = mqtt.events();
    bridge.start().await;

    tokio::spawn(mqtt_consumer_loop(mqtt_events, bridge.clone(), metrics.clone()));

    let (updates_tx, updates_rx) = mpsc::channel(256);
    tokio::spawn(run_push_listener(octoprint, updates_tx));
    tokio::spawn(host_update_loop(updates_rx, bridge.clone()));

    #[cfg(unix)]
    tokio::spawn(reload_on_hangup(bridge_cfg.clone(), bridge.clone()));

    let state = AppState { mqtt: mqtt.clone(), bridge, metrics };
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/version", get(version))
        .route("/metrics", get(metrics_handler))
        .route("/api/events", post(api_inject_event))
        .with_state(state);

    let addr = bridge_cfg.http_addr;
    info!(%addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    if let Err(err) = mqtt.disconnect().await {
        warn!(?err, "MQTT disconnect failed");
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,hassprint=info,rumqttc=warn"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install signal handler");
        term.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[cfg(unix)]
async fn reload_on_hangup(cfg: BridgeConfig, bridge: Arc<Bridge>) {
    use tokio::signal::unix::{signal, SignalKind};
    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(err) => {
            warn!(?err, "SIGHUP handler unavailable; settings reload disabled");
            return;
        }
    };
    while hangup.recv().await.is_some() {
        info!(path = %cfg.state_path.display(), "SIGHUP received; reloading node identity");
        match cfg.load_settings() {
            Ok(settings) => {
                bridge.apply_settings(settings).await;
            }
            Err(err) => warn!(%err, "Settings reload failed; keeping current settings"),
        }
    }
}

async fn mqtt_consumer_loop(mut rx: broadcast::Receiver<MqttEvent>, bridge: Arc<Bridge>, metrics: Arc<Metrics>) {
    loop {
        match rx.recv().await {
            Ok(MqttEvent::Connected) => metrics.mqtt_connected.set(1),
            Ok(MqttEvent::Disconnected) => metrics.mqtt_connected.set(0),
            Ok(MqttEvent::Publish { topic, payload }) => bridge.handle_message(&topic, &payload).await,
            Ok(MqttEvent::PubAck(_)) => { /* ack observed */ }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "MQTT consumer lagged; messages dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn host_update_loop(mut rx: mpsc::Receiver<HostUpdate>, bridge: Arc<Bridge>) {
    while let Some(update) = rx.recv().await {
        bridge.on_host_update(update).await;
    }
}

async fn healthz() -> &'static str { "ok" }

async fn readyz(State(state): State<AppState>) -> StatusCode {
    if state.mqtt.is_ready() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE }
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok((content_type, body)) => {
            ([(axum::http::header::CONTENT_TYPE, content_type)], body).into_response()
        }
        Err(err) => {
            warn!(?err, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn api_inject_event(State(state): State<AppState>, Json(req): Json<EventRequest>) -> Response {
    if let Err(err) = req.event.parse::<PrinterEvent>() {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(serde_json::json!({ "error": err.to_string() }))).into_response();
    }
    state
        .bridge
        .on_host_update(HostUpdate::Event { name: req.event, payload: req.payload })
        .await;
    StatusCode::ACCEPTED.into_response()
}
