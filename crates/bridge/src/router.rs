use std::sync::Arc;

use hassprint_core::{PrinterEvent, PublishOptions, TopicTemplate};
use tracing::debug;

use crate::context::Context;
use crate::status::StatusTranslator;
use crate::timer::PollTimer;

pub const IS_PRINTING: &str = "is_printing";
pub const IS_PAUSED: &str = "is_paused";

pub fn flag_payload(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// Applies host lifecycle events: status refresh, flag topics and the poll
/// timer.
#[derive(Clone)]
pub struct EventRouter {
    ctx: Arc<Context>,
    status: StatusTranslator,
    timer: Arc<PollTimer>,
}

impl EventRouter {
    pub fn new(ctx: Arc<Context>, status: StatusTranslator, timer: Arc<PollTimer>) -> Self {
        Self { ctx, status, timer }
    }

    pub async fn on_event(&self, event: PrinterEvent) {
        debug!(%event, "Host event; updating status");
        self.ctx.metrics.host_events_total.with_label_values(&[event.host_name()]).inc();
        self.status.publish_status().await;

        match event {
            PrinterEvent::PrintStarted => {
                self.publish_flag(IS_PRINTING, true).await;
                self.timer.start().await;
                self.publish_flag(IS_PAUSED, false).await;
            }
            PrinterEvent::PrintDone | PrinterEvent::PrintFailed | PrinterEvent::PrintCancelled => {
                self.publish_flag(IS_PRINTING, false).await;
                self.timer.stop().await;
            }
            PrinterEvent::PrintPaused => {
                self.publish_flag(IS_PAUSED, true).await;
            }
            PrinterEvent::PrintResumed => {
                self.publish_flag(IS_PAUSED, false).await;
            }
            PrinterEvent::Connecting
            | PrinterEvent::Connected
            | PrinterEvent::Disconnecting
            | PrinterEvent::Disconnected
            | PrinterEvent::Error
            | PrinterEvent::PrinterStateChanged
            | PrinterEvent::FileSelected
            | PrinterEvent::FileDeselected
            | PrinterEvent::ZChange
            | PrinterEvent::PrintProgress => {}
        }
    }

    pub async fn publish_flag(&self, flag: &str, value: bool) -> bool {
        let topic = self.ctx.settings().await.topics.full(TopicTemplate::Hass, flag);
        self.ctx.publish(&topic, flag_payload(value), PublishOptions::queued()).await
    }
}
