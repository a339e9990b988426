//! Signal relay: handlers only flip flags, the engine acts on them later.
//!
//! Nothing here touches the job table or the foreground slot. The engine
//! drains the flags between commands and while it polls a foreground job,
//! so all state changes and all printing happen on the main loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGALRM, SIGINT, SIGTSTP};

use crate::error::ShellError;

/// A keyboard or timer signal that reached the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEvent {
    /// Ctrl-Z (SIGTSTP).
    Stop,
    /// Ctrl-C (SIGINT).
    Interrupt,
    /// SIGALRM.
    Alarm,
}

#[derive(Debug, Clone, Default)]
pub struct SignalRelay {
    stop: Arc<AtomicBool>,
    interrupt: Arc<AtomicBool>,
    alarm: Arc<AtomicBool>,
}

impl SignalRelay {
    /// Install the process-wide handlers. Call once, at startup.
    pub fn install() -> Result<Self, ShellError> {
        let relay = Self::default();

        for (signal, flag) in [
            (SIGTSTP, &relay.stop),
            (SIGINT, &relay.interrupt),
            (SIGALRM, &relay.alarm),
        ] {
            signal_hook::flag::register(signal, Arc::clone(flag))
                .map_err(|err| ShellError::syscall("sigaction", err))?;
        }

        Ok(relay)
    }

    /// Record `event` as if its signal had arrived.
    #[cfg(test)]
    pub fn raise(&self, event: RelayEvent) {
        self.flag(event).store(true, Ordering::SeqCst);
    }

    /// Take every pending event, in stop / interrupt / alarm order.
    pub fn drain(&self) -> Vec<RelayEvent> {
        [RelayEvent::Stop, RelayEvent::Interrupt, RelayEvent::Alarm]
            .into_iter()
            .filter(|&event| self.flag(event).swap(false, Ordering::SeqCst))
            .collect()
    }

    fn flag(&self, event: RelayEvent) -> &AtomicBool {
        match event {
            RelayEvent::Stop => &self.stop,
            RelayEvent::Interrupt => &self.interrupt,
            RelayEvent::Alarm => &self.alarm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_reports_each_event_once() {
        let relay = SignalRelay::default();
        relay.raise(RelayEvent::Alarm);
        relay.raise(RelayEvent::Stop);
        relay.raise(RelayEvent::Stop);

        assert_eq!(relay.drain(), vec![RelayEvent::Stop, RelayEvent::Alarm]);
        assert!(relay.drain().is_empty());
    }

    #[test]
    fn clones_share_flags() {
        let relay = SignalRelay::default();
        let handle = relay.clone();
        handle.raise(RelayEvent::Interrupt);
        assert_eq!(relay.drain(), vec![RelayEvent::Interrupt]);
    }
}
