use tokio::sync::broadcast;
use tracing::debug;

use kiln_types::CodeNotice;

/// Out-of-band push channel to the UI, fired once per generated file.
pub trait Notifier: Send + Sync {
    fn code_generated(&self, notice: CodeNotice);
}

/// Drops every notice.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn code_generated(&self, _notice: CodeNotice) {}
}

/// Fans notices out to every live subscriber. Slow subscribers lose the oldest notices.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<CodeNotice>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CodeNotice> {
        self.tx.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn code_generated(&self, notice: CodeNotice) {
        if self.tx.send(notice).is_err() {
            debug!("no UI subscribers for code notice");
        }
    }
}
