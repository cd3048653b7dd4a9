/*!
Prober scripté pour l'attente de joignabilité post-reboot
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use warden_core::{ProbeOutcome, Prober};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedOutcome {
    Reachable,
    Refused,
    TimedOut,
    /// Erreur io hors refus/timeout, fatale pour l'attente
    Unreachable,
}

impl ScriptedOutcome {
    fn into_outcome(self) -> ProbeOutcome {
        match self {
            ScriptedOutcome::Reachable => ProbeOutcome::Reachable,
            ScriptedOutcome::Refused => ProbeOutcome::Refused,
            ScriptedOutcome::TimedOut => ProbeOutcome::TimedOut,
            ScriptedOutcome::Unreachable => {
                ProbeOutcome::Failed(io::Error::new(io::ErrorKind::PermissionDenied, "network is unreachable"))
            }
        }
    }
}

/// Rejoue une file de résultats, puis `fallback` une fois la file vide
pub struct ScriptedProber {
    outcomes: Mutex<VecDeque<ScriptedOutcome>>,
    fallback: Mutex<ScriptedOutcome>,
    calls: AtomicU32,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(ScriptedOutcome::Reachable),
            calls: AtomicU32::new(0),
        }
    }

    pub fn push(&self, outcome: ScriptedOutcome) -> &Self {
        self.outcomes.lock().push_back(outcome);
        self
    }

    pub fn fallback(&self, outcome: ScriptedOutcome) -> &Self {
        *self.fallback.lock() = outcome;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, address: &str, port: u16, _timeout: Duration) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.outcomes.lock().pop_front();
        let outcome = next.unwrap_or_else(|| *self.fallback.lock());
        log::debug!("[MOCK] probe {}:{} -> {:?}", address, port, outcome);
        outcome.into_outcome()
    }
}
