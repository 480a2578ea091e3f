//! Notification sinks: fire-and-forget delivery of alerts to the external
//! notification collaborator.
//!
//! Modules accept an `Arc<dyn NotificationSink>`; delivery is never awaited and
//! never reported back, only generation is guaranteed.

use crate::types::{Alert, AlertKind};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub trait NotificationSink: Send + Sync {
    fn notify(&self, alert: Alert);
}

/// No-op sink for tests and deployments without a notification backend.
pub struct NoOpSink;

impl NotificationSink for NoOpSink {
    fn notify(&self, _alert: Alert) {}
}

/// Writes each alert as a structured log line.
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, alert: Alert) {
        info!(
            campaign_id = %alert.campaign_id,
            kind = alert.kind.as_str(),
            impressions = alert.metrics.impressions,
            ctr = alert.metrics.ctr,
            "{}",
            alert.message
        );
    }
}

/// Forwards alerts into a bounded channel drained by a delivery task.
/// Alerts are dropped (and counted) when the channel is full.
pub struct ChannelSink {
    sender: mpsc::Sender<Alert>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, alert: Alert) {
        if let Err(e) = self.sender.try_send(alert) {
            metrics::counter!("alerts.dropped").increment(1);
            warn!("Alert notification dropped: {}", e);
        } else {
            metrics::counter!("alerts.queued").increment(1);
        }
    }
}

/// Drain a `ChannelSink` receiver into `downstream`. The task ends once every
/// sender has been dropped.
pub fn spawn_delivery(
    mut receiver: mpsc::Receiver<Alert>,
    downstream: Arc<dyn NotificationSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(alert) = receiver.recv().await {
            downstream.notify(alert);
            metrics::counter!("alerts.delivered").increment(1);
        }
        debug!("Alert delivery task finished");
    })
}

/// In-memory sink that captures alerts for testing.
#[derive(Default)]
pub struct CaptureSink {
    alerts: Mutex<Vec<Alert>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn count_kind(&self, kind: AlertKind) -> usize {
        self.alerts.lock().iter().filter(|a| a.kind == kind).count()
    }

    pub fn clear(&self) {
        self.alerts.lock().clear();
    }
}

impl NotificationSink for CaptureSink {
    fn notify(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}

/// Convenience: a sink that discards everything.
pub fn noop_sink() -> Arc<dyn NotificationSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
