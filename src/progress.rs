use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Human-readable milestone
    Message(String),
    /// Per-item progress of a batch operation
    Item { current: usize, total: usize, name: String },
}

/// Fire-and-forget progress channel threaded through long operations.
///
/// Sending never blocks, and a dropped receiver is silently ignored, so a
/// sink can never change the behavior of the operation reporting to it.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<UnboundedSender<Progress>>,
}

impl ProgressSink {
    pub fn new(tx: UnboundedSender<Progress>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn channel() -> (Self, UnboundedReceiver<Progress>) {
        let (tx, rx) = unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn silent() -> Self {
        Self { tx: None }
    }

    pub fn message(&self, message: impl Into<String>) {
        self.send(Progress::Message(message.into()));
    }

    pub fn item(&self, current: usize, total: usize, name: impl Into<String>) {
        self.send(Progress::Item {
            current,
            total,
            name: name.into(),
        });
    }

    fn send(&self, progress: Progress) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(progress);
        }
    }
}
