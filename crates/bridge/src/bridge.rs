use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use hassprint_core::discovery::{AVAILABLE, NOT_AVAILABLE};
use hassprint_core::{ControlKind, PrinterControl, PrinterEvent, PublishOptions, TopicTemplate};
use hassprint_octoprint::HostUpdate;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::context::{Context, Transport};
use crate::dispatcher::CommandDispatcher;
use crate::metrics::Metrics;
use crate::mirror::{event_payload, HostMirror};
use crate::registrar::DiscoveryRegistrar;
use crate::router::{EventRouter, IS_PAUSED, IS_PRINTING};
use crate::settings::BridgeSettings;
use crate::status::StatusTranslator;
use crate::timer::{PollTimer, POLL_PERIOD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Control(ControlKind),
    Availability,
}

/// The engine: owns every component and the poll timer, and routes inbound
/// MQTT messages and host updates to them.
pub struct Bridge {
    ctx: Arc<Context>,
    registrar: DiscoveryRegistrar,
    status: StatusTranslator,
    router: EventRouter,
    dispatcher: CommandDispatcher,
    mirror: HostMirror,
    timer: Arc<PollTimer>,
    routes: RwLock<HashMap<String, Route>>,
}

impl Bridge {
    pub fn new(
        transport: Transport,
        printer: Arc<dyn PrinterControl>,
        settings: BridgeSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self::with_poll_period(transport, printer, settings, metrics, POLL_PERIOD)
    }

    pub fn with_poll_period(
        transport: Transport,
        printer: Arc<dyn PrinterControl>,
        settings: BridgeSettings,
        metrics: Arc<Metrics>,
        period: Duration,
    ) -> Self {
        let ctx = Context::new(transport, printer, settings, metrics);
        let status = StatusTranslator::new(ctx.clone());
        let tick_status = status.clone();
        let timer = Arc::new(PollTimer::new(period, move || {
            let status = tick_status.clone();
            async move {
                status.publish_status().await;
            }
            .boxed()
        }));

        Self {
            registrar: DiscoveryRegistrar::new(ctx.clone()),
            router: EventRouter::new(ctx.clone(), status.clone(), timer.clone()),
            dispatcher: CommandDispatcher::new(ctx.clone()),
            mirror: HostMirror::new(ctx.clone()),
            status,
            timer,
            ctx,
            routes: RwLock::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn timer(&self) -> &PollTimer {
        &self.timer
    }

    pub fn registrar(&self) -> &DiscoveryRegistrar {
        &self.registrar
    }

    pub fn status(&self) -> &StatusTranslator {
        &self.status
    }

    pub async fn route(&self, topic: &str) -> Option<Route> {
        self.routes.read().await.get(topic).copied()
    }

    /// Startup sequence; also re-run when settings change.
    pub async fn start(&self) {
        let settings = self.ctx.settings().await;
        let topics = &settings.topics;
        let availability_topic = topics.full(TopicTemplate::LastWill, "");
        info!(node_id = %settings.identity.node_id, "Registering node");

        let mut routes = HashMap::new();
        if let Some(subscriber) = &self.ctx.transport.subscriber {
            match subscriber.subscribe(&availability_topic).await {
                Ok(()) => {
                    routes.insert(availability_topic.clone(), Route::Availability);
                }
                Err(err) => warn!(topic = %availability_topic, %err, "Failed to subscribe to availability topic"),
            }
        }

        self.registrar.register_sensors().await;
        for route in self.registrar.register_controls(true).await {
            routes.insert(route.topic, Route::Control(route.kind));
        }
        *self.routes.write().await = routes;

        // Hubs without retained messages only see the sensors come online here
        self.ctx.publish(&availability_topic, AVAILABLE, PublishOptions::queued()).await;
        self.router.publish_flag(IS_PRINTING, false).await;
        self.router.publish_flag(IS_PAUSED, false).await;
        self.status.publish_status().await;

        match self.ctx.printer.get_current_connection().await {
            Ok(connection) => {
                let state = if connection.is_closed() { "Disconnected" } else { "Connected" };
                let topic = topics.full(TopicTemplate::Event, "Connected");
                self.ctx
                    .publish_json(&topic, &event_payload(state, &json!({})), PublishOptions::queued())
                    .await;
            }
            Err(err) => warn!(%err, "Could not read printer connection state"),
        }
    }

    pub async fn handle_message(&self, topic: &str, payload: &[u8]) {
        match self.route(topic).await {
            Some(Route::Control(kind)) => self.dispatcher.dispatch(kind, payload).await,
            Some(Route::Availability) => {
                let text = String::from_utf8_lossy(payload);
                let text = text.trim();
                info!(topic, payload = %text, "Availability message received");
                if text == AVAILABLE {
                    self.registrar.register_sensors().await;
                    self.registrar.register_controls(false).await;
                } else if text != NOT_AVAILABLE {
                    debug!(topic, "Unrecognized availability payload");
                }
            }
            None => debug!(topic, "No route for MQTT message"),
        }
    }

    pub async fn on_event(&self, event: PrinterEvent) {
        self.router.on_event(event).await;
    }

    /// Mirrors a host update onto MQTT and feeds lifecycle changes to the
    /// event router.
    pub async fn on_host_update(&self, update: HostUpdate) {
        self.mirror.publish(&update).await;
        match &update {
            HostUpdate::Event { name, .. } => match name.parse::<PrinterEvent>() {
                Ok(event) => self.on_event(event).await,
                Err(err) => debug!(%err, "Host event ignored"),
            },
            HostUpdate::Progress { .. } => self.on_event(PrinterEvent::PrintProgress).await,
            HostUpdate::Temperature { .. } => {}
        }
    }

    /// Replaces the settings. Returns whether the startup sequence was re-run
    /// because published documents went stale.
    pub async fn apply_settings(&self, next: BridgeSettings) -> bool {
        let reregister = {
            let mut current = self.ctx.settings.write().await;
            let changed = current.requires_reregistration(&next);
            *current = next;
            changed
        };
        if reregister {
            info!("Node settings changed; re-registering");
            self.start().await;
        }
        reregister
    }
}
