//! Per-job in-process leases.
//!
//! At most one caller works on a given job id at a time; others block until
//! the holder's guard is dropped.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};

use forgebatch_core::JobId;

use super::error::CoordinatorError;

#[derive(Debug, Default)]
pub struct JobLeases {
    held: Mutex<HashSet<JobId>>,
    released: Condvar,
}

impl JobLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lease for `job_id` is free, then take it.
    pub fn acquire(&self, job_id: &JobId) -> Result<JobLease<'_>, CoordinatorError> {
        let mut held = self.held.lock().map_err(|_| CoordinatorError::LeasePoisoned)?;
        while held.contains(job_id) {
            held = self
                .released
                .wait(held)
                .map_err(|_| CoordinatorError::LeasePoisoned)?;
        }
        held.insert(job_id.clone());
        Ok(JobLease {
            leases: self,
            job_id: job_id.clone(),
        })
    }
}

/// Releases the lease on drop.
#[derive(Debug)]
pub struct JobLease<'a> {
    leases: &'a JobLeases,
    job_id: JobId,
}

impl JobLease<'_> {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }
}

impl Drop for JobLease<'_> {
    fn drop(&mut self) {
        let mut held = self
            .leases
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        held.remove(&self.job_id);
        drop(held);
        self.leases.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn lease_is_exclusive_per_job() {
        let leases = JobLeases::new();
        let a = JobId::new("a").unwrap();
        let b = JobId::new("b").unwrap();

        let guard = leases.acquire(&a).unwrap();
        assert_eq!(guard.job_id(), &a);
        // Another job id is never blocked by `a`.
        let other = leases.acquire(&b).unwrap();
        assert_eq!(other.job_id(), &b);

        drop(guard);
        drop(other);
        assert!(leases.held.lock().unwrap().is_empty());
        assert_eq!(leases.acquire(&a).unwrap().job_id(), &a);
    }

    #[test]
    fn waiting_caller_proceeds_after_release() {
        let leases = Arc::new(JobLeases::new());
        let job = JobId::new("shared").unwrap();
        let guard = leases.acquire(&job).unwrap();
        let entered = Arc::new(AtomicBool::new(false));

        let waiter = {
            let leases = leases.clone();
            let job = job.clone();
            let entered = entered.clone();
            thread::spawn(move || {
                let _lease = leases.acquire(&job).unwrap();
                entered.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::SeqCst));

        drop(guard);
        waiter.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
        assert!(!leases.held.lock().unwrap().contains(&job));
    }
}
