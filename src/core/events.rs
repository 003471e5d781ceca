use crate::core::refresh::RefreshResult;
use tokio::sync::broadcast;

#[derive(Clone, Debug)]
pub enum PortfolioEvent {
    RefreshStarted,
    /// A refresh was requested while another one was running.
    RefreshSkipped,
    DataChanged { version: u64 },
    RefreshCompleted(RefreshResult),
}

/// Broadcast bus fanning out portfolio events to every subscriber.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PortfolioEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PortfolioEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: PortfolioEvent) {
        // Nobody listening is fine; lagging receivers drop old events
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
