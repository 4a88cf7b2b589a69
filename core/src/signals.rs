use kestrel_core::{info, warn};
use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};
use triggered::{Listener, Trigger};

/// A node-wide shutdown signal. Cloned into every long running component, which
/// wait on [`Shutdown::listener`] and exit once it fires.
#[derive(Clone)]
pub struct Shutdown {
    trigger: Trigger,
    listener: Listener,
}

impl Shutdown {
    pub fn new() -> Self {
        let (trigger, listener) = triggered::trigger();
        Self { trigger, listener }
    }

    pub fn trigger(&self) {
        self.trigger.trigger();
    }

    pub fn listener(&self) -> Listener {
        self.listener.clone()
    }

    pub fn is_triggered(&self) -> bool {
        self.listener.is_triggered()
    }

    /// Hooks SIGINT/SIGTERM. The first signal requests a graceful shutdown, a third one aborts.
    pub fn install_os_handler(&self) -> Result<(), ctrlc::Error> {
        let trigger = self.trigger.clone();
        let count = Arc::new(AtomicU32::new(0));
        ctrlc::set_handler(move || {
            let n = count.fetch_add(1, Ordering::SeqCst) + 1;
            match n {
                1 => {
                    info!("^SIGNAL - shutting down...");
                    trigger.trigger();
                }
                2 => warn!("^SIGNAL - shutdown already in progress, signal again to halt immediately"),
                _ => {
                    warn!("^SIGNAL - halting");
                    std::process::exit(1);
                }
            }
        })
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signal() {
        let shutdown = Shutdown::new();
        let other = shutdown.clone();
        assert!(!other.is_triggered());
        shutdown.trigger();
        assert!(other.is_triggered());
    }
}
