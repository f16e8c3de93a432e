//! Versioned storage of per-bucket policy records
//!
//! Writes are optimistic: a record replaces the stored one only if the
//! stored version is still the one the writer read. Buckets are independent
//! shards, so there is no lock across buckets.

use crate::error::Result;
use crate::policy::state::PolicyRecord;
use crate::types::BucketKey;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Keyed store of policy records with compare-and-swap updates
pub trait PolicyStore: Send + Sync {
    /// Current record of a bucket, `None` if never written
    fn load(&self, bucket: &BucketKey) -> Result<Option<PolicyRecord>>;

    /// Replace the bucket's record if its version still equals `expected`
    ///
    /// `expected = None` inserts only when the bucket has no record. Returns
    /// `false` when another writer got there first.
    fn compare_and_swap(&self, expected: Option<u64>, record: PolicyRecord) -> Result<bool>;

    /// All records, ordered by bucket
    fn list(&self) -> Result<Vec<PolicyRecord>>;
}

/// Sharded in-memory policy store
#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    records: DashMap<BucketKey, PolicyRecord>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PolicyStore for InMemoryPolicyStore {
    fn load(&self, bucket: &BucketKey) -> Result<Option<PolicyRecord>> {
        Ok(self.records.get(bucket).map(|r| r.value().clone()))
    }

    fn compare_and_swap(&self, expected: Option<u64>, record: PolicyRecord) -> Result<bool> {
        match self.records.entry(record.bucket.clone()) {
            Entry::Occupied(mut occupied) => {
                if Some(occupied.get().version) == expected {
                    occupied.insert(record);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                if expected.is_none() {
                    vacant.insert(record);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    fn list(&self) -> Result<Vec<PolicyRecord>> {
        let mut records: Vec<PolicyRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.bucket.cmp(&b.bucket));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LearnerConfig;

    fn record(version: u64) -> PolicyRecord {
        let mut r = PolicyRecord::unseen(BucketKey::new("mia", "comedy"), &LearnerConfig::default());
        r.version = version;
        r
    }

    #[test]
    fn test_insert_only_when_absent() {
        let store = InMemoryPolicyStore::new();
        assert!(store.compare_and_swap(None, record(1)).unwrap());
        assert!(!store.compare_and_swap(None, record(1)).unwrap());
    }

    #[test]
    fn test_stale_version_rejected() {
        let store = InMemoryPolicyStore::new();
        store.compare_and_swap(None, record(1)).unwrap();
        assert!(store.compare_and_swap(Some(1), record(2)).unwrap());
        assert!(!store.compare_and_swap(Some(1), record(2)).unwrap());
        assert!(!store.compare_and_swap(Some(5), record(6)).unwrap());

        let stored = store.load(&BucketKey::new("mia", "comedy")).unwrap().unwrap();
        assert_eq!(stored.version, 2);
    }

    #[test]
    fn test_missing_bucket_with_expected_version() {
        let store = InMemoryPolicyStore::new();
        assert!(!store.compare_and_swap(Some(1), record(2)).unwrap());
        assert!(store.load(&BucketKey::new("mia", "comedy")).unwrap().is_none());
    }

    #[test]
    fn test_list_sorted() {
        let store = InMemoryPolicyStore::new();
        for persona in ["zoe", "ava", "mia"] {
            let r = PolicyRecord::unseen(BucketKey::new(persona, "vlog"), &LearnerConfig::default());
            store.compare_and_swap(None, r).unwrap();
        }
        let personas: Vec<String> = store
            .list()
            .unwrap()
            .into_iter()
            .map(|r| r.bucket.persona)
            .collect();
        assert_eq!(personas, vec!["ava", "mia", "zoe"]);
    }
}
