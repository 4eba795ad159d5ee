//! Process-wide kill switch
//!
//! Monotonic once activated: every suspended wait in every incident loop
//! unblocks and refuses further tool execution. Only an operator may reset
//! it.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

/// The global cancellation flag.
pub struct KillSwitch {
    active: AtomicBool,
    tx: watch::Sender<bool>,
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl KillSwitch {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            active: AtomicBool::new(false),
            tx,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Activate the switch, waking every subscriber.
    pub fn activate(&self) {
        if !self.active.swap(true, Ordering::SeqCst) {
            tracing::error!("kill switch activated");
            let _ = self.tx.send(true);
        }
    }

    /// Operator-only reset.
    pub fn reset(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            tracing::warn!("kill switch reset by operator");
            let _ = self.tx.send(false);
        }
    }

    /// Subscribe for change notifications; used at suspension points to
    /// unblock waits.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
