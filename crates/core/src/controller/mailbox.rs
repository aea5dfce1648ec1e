//! Non-blocking single-slot mailbox used to forward upgrade-available
//! signals from the heartbeat task to whoever is watching for them,
//! without ever blocking the heartbeat loop (§4.G, §9).

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// A cheaply cloneable handle to a one-item mailbox. `try_send` never
/// blocks: if the slot is already occupied, the new value is dropped and
/// handed back to the caller to log.
#[derive(Clone)]
pub struct UpgradeMailbox {
    slot: Arc<Mutex<Option<String>>>,
    notify: Arc<Notify>,
}

impl Default for UpgradeMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl UpgradeMailbox {
    pub fn new() -> Self {
        Self { slot: Arc::new(Mutex::new(None)), notify: Arc::new(Notify::new()) }
    }

    /// Attempts to deposit `version`. Returns it back on failure (slot
    /// full); the caller is expected to log and drop it.
    pub fn try_send(&self, version: String) -> Result<(), String> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(version);
        }
        *slot = Some(version);
        drop(slot);
        self.notify.notify_one();
        Ok(())
    }

    /// Waits for and takes the next value.
    pub async fn recv(&self) -> String {
        loop {
            if let Some(v) = self.slot.lock().take() {
                return v;
            }
            let notified = self.notify.notified();
            if let Some(v) = self.slot.lock().take() {
                return v;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_send_without_drain_is_dropped() {
        let mailbox = UpgradeMailbox::new();
        assert!(mailbox.try_send("1.2.3".to_string()).is_ok());
        assert_eq!(mailbox.try_send("1.2.4".to_string()), Err("1.2.4".to_string()));
    }

    #[tokio::test]
    async fn recv_returns_sent_value() {
        let mailbox = UpgradeMailbox::new();
        mailbox.try_send("1.2.3".to_string()).unwrap();
        assert_eq!(mailbox.recv().await, "1.2.3");
    }

    #[tokio::test]
    async fn send_succeeds_again_after_drain() {
        let mailbox = UpgradeMailbox::new();
        mailbox.try_send("1.2.3".to_string()).unwrap();
        mailbox.recv().await;
        assert!(mailbox.try_send("1.2.4".to_string()).is_ok());
    }
}
