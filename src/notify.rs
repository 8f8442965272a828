//! User-visible toast side channel.

use tokio::sync::broadcast;

const TOAST_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Success,
    Failure,
}

/// A success or failure banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
}

/// Broadcasts toasts to whoever renders them. `Clone` is cheap.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Toast>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(TOAST_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Toast> {
        self.tx.subscribe()
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(ToastLevel::Success, message.into());
    }

    pub fn failure(&self, message: impl Into<String>) {
        self.emit(ToastLevel::Failure, message.into());
    }

    fn emit(&self, level: ToastLevel, message: String) {
        // Nobody rendering toasts is fine.
        let _ = self.tx.send(Toast { level, message });
    }
}
