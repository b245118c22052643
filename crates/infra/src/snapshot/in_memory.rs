use std::collections::HashMap;
use std::sync::RwLock;

use forgebatch_core::{ExpectedVersion, JobId};
use forgebatch_jobs::Job;

use super::r#trait::{JobSnapshotStore, SnapshotStoreError, version_conflict};

#[derive(Debug, Clone)]
struct StoredSnapshot {
    version: u64,
    /// Serialized so that loads never alias the saved value.
    state: String,
}

/// In-memory snapshot store.
///
/// Snapshots go through JSON on every save/load, like the Postgres store.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    inner: RwLock<HashMap<JobId, StoredSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> SnapshotStoreError {
    SnapshotStoreError::Storage("lock poisoned".to_string())
}

impl JobSnapshotStore for InMemorySnapshotStore {
    fn load(&self, job_id: &JobId) -> Result<Option<Job>, SnapshotStoreError> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        let Some(stored) = inner.get(job_id) else {
            return Ok(None);
        };
        let mut job: Job = serde_json::from_str(&stored.state)
            .map_err(|e| SnapshotStoreError::Serialization(e.to_string()))?;
        job.version = stored.version;
        Ok(Some(job))
    }

    fn save(&self, job: &Job, expected: ExpectedVersion) -> Result<u64, SnapshotStoreError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let current = inner.get(&job.id).map_or(0, |s| s.version);
        if !expected.matches(current) {
            return Err(version_conflict(&job.id, expected, current));
        }

        let version = current + 1;
        let mut stored = job.clone();
        stored.version = version;
        let state = serde_json::to_string(&stored)
            .map_err(|e| SnapshotStoreError::Serialization(e.to_string()))?;
        inner.insert(job.id.clone(), StoredSnapshot { version, state });
        Ok(version)
    }

    fn delete(&self, job_id: &JobId) -> Result<bool, SnapshotStoreError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        Ok(inner.remove(job_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgebatch_jobs::{JobSpec, OperationSpec, Redirects};

    fn job() -> Job {
        let (job, _) = JobSpec::new("Snapshot")
            .with_id(JobId::new("snap").unwrap())
            .with_operation(OperationSpec::new("import").with_size(3))
            .into_job(&Redirects::default())
            .unwrap();
        job
    }

    #[test]
    fn save_and_load_round_trip_bumps_version() {
        let store = InMemorySnapshotStore::new();
        let mut job = job();

        let v1 = store.save(&job, ExpectedVersion::Exact(0)).unwrap();
        assert_eq!(v1, 1);

        job.errors = 2;
        job.version = v1;
        let v2 = store.save(&job, ExpectedVersion::Exact(v1)).unwrap();
        assert_eq!(v2, 2);

        let loaded = store.load(&job.id).unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.errors, 2);
    }

    #[test]
    fn stale_save_is_rejected() {
        let store = InMemorySnapshotStore::new();
        let job = job();
        store.save(&job, ExpectedVersion::Exact(0)).unwrap();

        let err = store.save(&job, ExpectedVersion::Exact(0)).unwrap_err();
        assert!(matches!(err, SnapshotStoreError::Conflict(_)));

        assert_eq!(store.save(&job, ExpectedVersion::Any).unwrap(), 2);
    }

    #[test]
    fn delete_reports_presence() {
        let store = InMemorySnapshotStore::new();
        let job = job();
        assert!(!store.delete(&job.id).unwrap());
        store.save(&job, ExpectedVersion::Any).unwrap();
        assert!(store.delete(&job.id).unwrap());
        assert!(store.load(&job.id).unwrap().is_none());
        assert!(store.is_empty());
    }
}
