use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{AlertLogRecord, ScoreboardRecord, ViolationLogRecord};

/// Fire-and-forget push payloads. Every push carries the full current list,
/// so late or lagging subscribers converge on the next event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Notification {
    ScoreboardUpdated(Vec<ScoreboardRecord>),
    Violations(Vec<ViolationLogRecord>),
    Alerts(Vec<AlertLogRecord>),
}

pub trait Notifier: Send + Sync {
    fn push(&self, notification: Notification);
}

/// Broadcast fan-out to however many transport adapters are subscribed.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn push(&self, notification: Notification) {
        // no subscribers is fine, delivery is best-effort
        let _ = self.tx.send(notification);
    }
}

/// Collects pushes in order. Test double.
#[derive(Default)]
pub struct RecordingNotifier {
    pushed: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut self.pushed.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.pushed.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Notifier for RecordingNotifier {
    fn push(&self, notification: Notification) {
        self.pushed.lock().unwrap().push(notification);
    }
}
