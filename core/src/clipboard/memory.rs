//! In-process clipboard

use std::sync::Mutex;

use super::{ChangeHandler, ChangeNotifier, ClipboardBridge, Subscription};
use crate::Result;

/// Clipboard held in memory.
///
/// Behaves like a host clipboard: every write, including ones made by a
/// subscriber, is reported to all subscribers.
#[derive(Default)]
pub struct MemoryClipboard {
    content: Mutex<Option<String>>,
    writes: Mutex<Vec<String>>,
    subscribers: Mutex<Vec<ChangeNotifier>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `text` already on the clipboard
    pub fn with_content(text: impl Into<String>) -> Self {
        let clipboard = Self::new();
        *clipboard.content.lock().unwrap_or_else(|e| e.into_inner()) = Some(text.into());
        clipboard
    }

    /// Every value passed to `write_current`, oldest first
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|n| !n.is_cancelled());
        subscribers.len()
    }
}

impl std::fmt::Debug for MemoryClipboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryClipboard")
            .field("content", &*self.content.lock().unwrap_or_else(|e| e.into_inner()))
            .finish_non_exhaustive()
    }
}

impl ClipboardBridge for MemoryClipboard {
    fn read_current(&self) -> Result<Option<String>> {
        Ok(self.content.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn write_current(&self, text: &str) -> Result<()> {
        *self.content.lock().unwrap_or_else(|e| e.into_inner()) = Some(text.to_string());
        self.writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());

        // Snapshot the list so handlers may write back without deadlocking
        let subscribers: Vec<ChangeNotifier> = {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            subscribers.retain(|n| !n.is_cancelled());
            subscribers.clone()
        };
        for notifier in subscribers {
            notifier.notify(text.to_string());
        }
        Ok(())
    }

    fn subscribe(&self, handler: ChangeHandler) -> Result<Subscription> {
        let (subscription, notifier) = Subscription::new(handler);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notifier);
        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_write_notifies_subscribers() {
        let clipboard = MemoryClipboard::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = clipboard
            .subscribe(Box::new(move |text| sink.lock().unwrap().push(text)))
            .unwrap();

        clipboard.write_current("one").unwrap();
        subscription.cancel();
        clipboard.write_current("two").unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["one".to_string()]);
        assert_eq!(clipboard.read_current().unwrap().as_deref(), Some("two"));
        assert_eq!(clipboard.writes(), vec!["one", "two"]);
        assert_eq!(clipboard.subscriber_count(), 0);
    }

    #[test]
    fn test_initial_content() {
        let clipboard = MemoryClipboard::with_content("hello");
        assert_eq!(clipboard.read_current().unwrap().as_deref(), Some("hello"));
        assert!(clipboard.writes().is_empty());
    }
}
