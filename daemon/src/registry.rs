//! In-process registry of in-flight workflows: serial → cancellation
//! token, job → serials, and the daemon counters snapshotted by the
//! status writer. Everything sits behind one lock; Command Intake reads
//! under the same lock that submission and completion mutate.

use crate::job::JobState;
use std::{
    collections::HashMap,
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, Default)]
pub struct JobCounters {
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

#[derive(Default)]
struct RegistryInner {
    by_serial: HashMap<String, CancellationToken>,
    by_job: HashMap<String, Vec<String>>,
    counters: JobCounters,
}

pub struct WorkflowRegistry {
    shutdown: CancellationToken,
    inner: Mutex<RegistryInner>,
}

impl WorkflowRegistry {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// The daemon-wide shutdown token; child workflow tokens derive from
    /// it so shutdown cancels everything at once.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Register a job's devices and hand back the per-job token.
    pub fn register_job(&self, job_id: &str, serials: &[String]) -> CancellationToken {
        let token = self.shutdown.child_token();
        let mut inner = self.inner.lock().unwrap();
        for serial in serials {
            inner.by_serial.insert(serial.clone(), token.clone());
        }
        inner
            .by_job
            .insert(job_id.to_string(), serials.to_vec());
        inner.counters.active += 1;
        token
    }

    /// Drop a finished job and record its terminal state.
    pub fn complete_job(&self, job_id: &str, outcome: JobState) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(serials) = inner.by_job.remove(job_id) {
            for serial in serials {
                inner.by_serial.remove(&serial);
            }
            inner.counters.active = inner.counters.active.saturating_sub(1);
        }
        match outcome {
            JobState::Completed => inner.counters.completed += 1,
            JobState::Failed => inner.counters.failed += 1,
            JobState::Cancelled => inner.counters.cancelled += 1,
            _ => {}
        }
    }

    /// Cancel every workflow belonging to `job_id`. Returns how many
    /// devices were signalled.
    pub fn cancel_job(&self, job_id: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        match inner.by_job.get(job_id) {
            Some(serials) => {
                let mut signalled = 0;
                for serial in serials {
                    if let Some(token) = inner.by_serial.get(serial) {
                        token.cancel();
                        signalled += 1;
                    }
                }
                signalled
            }
            None => 0,
        }
    }

    /// Cancel exactly one device's workflow.
    pub fn cancel_device(&self, serial: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.by_serial.get(serial) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_device_active(&self, serial: &str) -> bool {
        self.inner.lock().unwrap().by_serial.contains_key(serial)
    }

    pub fn is_job_active(&self, job_id: &str) -> bool {
        self.inner.lock().unwrap().by_job.contains_key(job_id)
    }

    pub fn counters(&self) -> JobCounters {
        self.inner.lock().unwrap().counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_cancel_by_job() {
        let registry = WorkflowRegistry::new(CancellationToken::new());
        let token = registry.register_job("j1", &["001".to_string(), "002".to_string()]);

        assert!(registry.is_device_active("001"));
        assert_eq!(registry.cancel_job("j1"), 2);
        assert!(token.is_cancelled());
        assert_eq!(registry.cancel_job("absent"), 0);
    }

    #[test]
    fn cancel_by_device_signals_the_job_token() {
        let registry = WorkflowRegistry::new(CancellationToken::new());
        let token = registry.register_job("j1", &["001".to_string()]);

        assert!(registry.cancel_device("001"));
        assert!(token.is_cancelled());
        assert!(!registry.cancel_device("absent"));
    }

    #[test]
    fn counters_follow_job_lifecycle() {
        let registry = WorkflowRegistry::new(CancellationToken::new());
        registry.register_job("j1", &["001".to_string()]);
        registry.register_job("j2", &["002".to_string()]);
        assert_eq!(registry.counters().active, 2);

        registry.complete_job("j1", JobState::Completed);
        registry.complete_job("j2", JobState::Failed);
        let counters = registry.counters();
        assert_eq!(counters.active, 0);
        assert_eq!(counters.completed, 1);
        assert_eq!(counters.failed, 1);
        assert!(!registry.is_device_active("001"));
    }

    #[test]
    fn shutdown_token_cancels_children() {
        let shutdown = CancellationToken::new();
        let registry = WorkflowRegistry::new(shutdown.clone());
        let token = registry.register_job("j1", &["001".to_string()]);

        shutdown.cancel();
        assert!(token.is_cancelled());
    }
}
