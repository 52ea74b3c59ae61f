use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::accounting::{AccountingSink, JournalEntry, SinkError};

/// final state of one journal delivery
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Delivered { reference: String, attempts: u32 },
    Failed { reference: String, error: SinkError },
}

/// fire-and-forget delivery of journal entries, off the ledger commit path
pub struct AccountingDispatcher {
    sink: Option<Arc<dyn AccountingSink>>,
    runtime: Option<Handle>,
    timeout: Duration,
    pending: Mutex<Vec<JoinHandle<DispatchOutcome>>>,
}

impl AccountingDispatcher {
    pub fn new(sink: Arc<dyn AccountingSink>, runtime: Handle, timeout: Duration) -> Self {
        Self {
            sink: Some(sink),
            runtime: Some(runtime),
            timeout,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// dispatcher for an unconfigured sink; entries are dropped
    pub fn disabled() -> Self {
        Self {
            sink: None,
            runtime: None,
            timeout: Duration::ZERO,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// validate and hand the entry to the runtime; never blocks and never fails the caller
    pub fn dispatch(&self, entry: JournalEntry) {
        if let Err(e) = entry.validate() {
            error!(reference = %entry.reference, error = %e, "journal entry not sent");
            return;
        }

        let (sink, runtime) = match (&self.sink, &self.runtime) {
            (Some(sink), Some(runtime)) => (Arc::clone(sink), runtime),
            _ => {
                debug!(reference = %entry.reference, "accounting disabled, entry skipped");
                return;
            }
        };

        let task = runtime.spawn(deliver(sink, entry, self.timeout));

        match self.pending.lock() {
            Ok(mut pending) => {
                // finished deliveries already logged their outcome
                pending.retain(|h| !h.is_finished());
                pending.push(task);
            }
            Err(_) => warn!("dispatcher queue poisoned, delivery left detached"),
        }
    }

    /// wait for every delivery still in flight; outcomes of deliveries that
    /// finished before the last dispatch are not reported again
    pub async fn flush(&self) -> Vec<DispatchOutcome> {
        let tasks = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => Vec::new(),
        };

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(error = %e, "journal delivery task aborted");
                    outcomes.push(DispatchOutcome::Failed {
                        reference: String::new(),
                        error: SinkError::Transport(e.to_string()),
                    });
                }
            }
        }
        outcomes
    }
}

/// post with a timeout, retrying once when the session expired
async fn deliver(sink: Arc<dyn AccountingSink>, entry: JournalEntry, timeout: Duration) -> DispatchOutcome {
    let mut attempts = 0;

    loop {
        attempts += 1;
        let result = match tokio::time::timeout(timeout, sink.post(&entry)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout),
        };

        match result {
            Ok(()) => {
                info!(reference = %entry.reference, attempts, "journal entry posted");
                return DispatchOutcome::Delivered {
                    reference: entry.reference,
                    attempts,
                };
            }
            Err(SinkError::AuthExpired) if attempts == 1 => {
                warn!(reference = %entry.reference, "accounting session expired, retrying");
            }
            Err(error) => {
                error!(
                    reference = %entry.reference,
                    attempts,
                    error = %error,
                    "journal entry permanently failed"
                );
                return DispatchOutcome::Failed {
                    reference: entry.reference,
                    error,
                };
            }
        }
    }
}
