//! Host clipboard access
//!
//! The sync core only needs three things from the host: read the current
//! text, write new text, and hear about changes. [`ClipboardBridge`] is that
//! capability; [`SystemClipboard`] backs it with the OS clipboard and
//! [`MemoryClipboard`] keeps everything in process.

mod memory;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use arboard::Clipboard as ArboardClipboard;
use tokio::task::JoinHandle;

use crate::{Error, Result};

pub use memory::MemoryClipboard;

/// Callback invoked with the new clipboard text
pub type ChangeHandler = Box<dyn Fn(String) + Send + Sync>;

/// Host clipboard capability
pub trait ClipboardBridge: Send + Sync {
    /// Current clipboard text, `None` when the clipboard holds no text
    fn read_current(&self) -> Result<Option<String>>;

    /// Replace the clipboard text. Subscribers are notified as for any
    /// other change.
    fn write_current(&self, text: &str) -> Result<()>;

    /// Register for change notifications until the returned handle is
    /// cancelled or dropped
    fn subscribe(&self, handler: ChangeHandler) -> Result<Subscription>;
}

type HandlerSlot = Arc<Mutex<Option<ChangeHandler>>>;

/// Handle to a clipboard change subscription.
///
/// Once [`Subscription::cancel`] returns the handler will not be invoked
/// again: notifications run under the same lock that cancellation takes.
pub struct Subscription {
    slot: HandlerSlot,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Create a subscription and the notifier that drives it
    pub fn new(handler: ChangeHandler) -> (Self, ChangeNotifier) {
        let slot: HandlerSlot = Arc::new(Mutex::new(Some(handler)));
        (
            Self {
                slot: slot.clone(),
                task: None,
            },
            ChangeNotifier { slot },
        )
    }

    /// Tie a background task (e.g. a poller) to this subscription
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    pub fn cancel(self) {
        drop(self);
    }

    fn release(&mut self) {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.slot.lock().map(|s| s.is_some()).unwrap_or(false))
            .finish()
    }
}

/// Producer side of a [`Subscription`]
#[derive(Clone)]
pub struct ChangeNotifier {
    slot: HandlerSlot,
}

impl ChangeNotifier {
    /// Deliver a change. Returns `false` once the subscription is cancelled.
    pub fn notify(&self, text: String) -> bool {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(handler) => {
                handler(text);
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.slot.lock().map(|s| s.is_none()).unwrap_or(true)
    }
}

/// OS clipboard, polled for changes
#[derive(Debug, Clone)]
pub struct SystemClipboard {
    poll_interval: Duration,
}

impl SystemClipboard {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl ClipboardBridge for SystemClipboard {
    fn read_current(&self) -> Result<Option<String>> {
        let mut clipboard = ArboardClipboard::new()
            .map_err(|e| Error::Clipboard(e.to_string()))?;

        match clipboard.get_text() {
            Ok(text) if !text.is_empty() => Ok(Some(text)),
            Ok(_) => Ok(None),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(e) => Err(Error::Clipboard(e.to_string())),
        }
    }

    fn write_current(&self, text: &str) -> Result<()> {
        let mut clipboard = ArboardClipboard::new()
            .map_err(|e| Error::Clipboard(e.to_string()))?;

        clipboard
            .set_text(text)
            .map_err(|e| Error::Clipboard(e.to_string()))
    }

    /// Must be called from within a tokio runtime
    fn subscribe(&self, handler: ChangeHandler) -> Result<Subscription> {
        let (subscription, notifier) = Subscription::new(handler);
        let poller = self.clone();
        // Baseline: content present before subscribing is not a change
        let mut last = poller.read_current().ok().flatten();

        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(poller.poll_interval).await;

                match poller.read_current() {
                    Ok(Some(text)) => {
                        if last.as_deref() == Some(text.as_str()) {
                            continue;
                        }
                        last = Some(text.clone());
                        if !notifier.notify(text) {
                            break;
                        }
                    }
                    Ok(None) => {
                        last = None;
                    }
                    Err(e) => {
                        tracing::warn!("clipboard read error: {}", e);
                    }
                }
            }
        });

        Ok(subscription.with_task(task))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_notify_until_cancelled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let (subscription, notifier) = Subscription::new(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(notifier.notify("a".to_string()));
        subscription.cancel();

        assert!(!notifier.notify("b".to_string()));
        assert!(notifier.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_cancels() {
        let (subscription, notifier) = Subscription::new(Box::new(|_| {}));
        drop(subscription);
        assert!(notifier.is_cancelled());
    }

    #[test]
    fn test_system_clipboard_roundtrip() {
        let clipboard = SystemClipboard::new(Duration::from_millis(50));

        // Headless CI has no clipboard; only check when the write succeeds
        if clipboard.write_current("clipsync test").is_ok() {
            if let Ok(Some(text)) = clipboard.read_current() {
                assert_eq!(text, "clipsync test");
            }
        }
    }
}
