//! # Diff Engine
//!
//! Change detection between the counterpart's application bag as it was
//! last seen and as it is now. The prior image is persisted in this
//! unit's own bag under a reserved key, so detection survives process
//! restarts and a redelivered notification collapses to an empty diff.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::constants::SNAPSHOT_KEY;
use crate::model::{Bucket, RelationId, RelationTransport, TransportError};

/// Keys added, changed and deleted in the remote application bag since
/// the previous snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub added: BTreeSet<String>,
    pub changed: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl Diff {
    /// Compares two bag images key by key.
    pub fn between(old: &BTreeMap<String, String>, new: &BTreeMap<String, String>) -> Self {
        let mut diff = Diff::default();
        for (key, value) in new {
            match old.get(key) {
                None => {
                    diff.added.insert(key.clone());
                }
                Some(previous) if previous != value => {
                    diff.changed.insert(key.clone());
                }
                Some(_) => {}
            }
        }
        for key in old.keys() {
            if !new.contains_key(key) {
                diff.deleted.insert(key.clone());
            }
        }
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.deleted.is_empty()
    }

    /// Keys whose current value is worth (re)examining.
    pub fn touched(&self) -> BTreeSet<String> {
        self.added.union(&self.changed).cloned().collect()
    }
}

/// Diffs the remote application bag against the persisted snapshot, then
/// replaces the snapshot with the current image.
///
/// A snapshot that fails to decode is treated as absent: one corrupt
/// write degrades to a full re-read with everything reported as added,
/// instead of a wedged relation.
pub async fn compute_diff(
    transport: &dyn RelationTransport,
    relation: RelationId,
) -> Result<Diff, TransportError> {
    let unit_bag = transport.read_bag(relation, Bucket::LocalUnit).await?;
    let old: BTreeMap<String, String> = match unit_bag.get(SNAPSHOT_KEY) {
        Some(raw) => match serde_json::from_str(raw) {
            Ok(image) => image,
            Err(err) => {
                warn!(relation = %relation, error = %err, "discarding undecodable bag snapshot");
                BTreeMap::new()
            }
        },
        None => BTreeMap::new(),
    };
    let current = transport.read_bag(relation, Bucket::RemoteApp).await?;
    let diff = Diff::between(&old, &current);

    let snapshot = serde_json::to_string(&current)
        .map_err(|err| TransportError::Backend(format!("failed to encode bag snapshot: {err}")))?;
    let mut entry = BTreeMap::new();
    entry.insert(SNAPSHOT_KEY.to_string(), snapshot);
    transport.write_bag(relation, Bucket::LocalUnit, &entry).await?;

    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InMemoryModel;

    fn image(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_between_classifies_added_changed_deleted() {
        let old = image(&[("container", "c1"), ("path", "/spark"), ("stale", "x")]);
        let new = image(&[("container", "c1"), ("path", "/etl"), ("storage-account", "acct")]);

        let diff = Diff::between(&old, &new);
        assert_eq!(diff.added, ["storage-account".to_string()].into());
        assert_eq!(diff.changed, ["path".to_string()].into());
        assert_eq!(diff.deleted, ["stale".to_string()].into());
        assert!(!diff.is_empty());
    }

    #[test]
    fn test_between_identical_images_is_empty() {
        let bag = image(&[("container", "c1")]);
        assert!(Diff::between(&bag, &bag).is_empty());
        assert!(Diff::between(&BTreeMap::new(), &BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_touched_unions_added_and_changed() {
        let old = image(&[("path", "/spark")]);
        let new = image(&[("path", "/etl"), ("container", "c1")]);
        let diff = Diff::between(&old, &new);
        assert_eq!(diff.touched(), ["container".to_string(), "path".to_string()].into());
    }

    #[tokio::test]
    async fn test_compute_diff_first_sight_reports_everything_added() {
        let model = InMemoryModel::new();
        model.set_leader("azure-integrator", true);
        let id = model.join("azure-credentials", "azure-integrator", "analytics");
        let provider = model.handle("azure-integrator");
        let requirer = model.handle("analytics");

        provider
            .write_bag(id, Bucket::LocalApp, &image(&[("container", "c1"), ("path", "/etl")]))
            .await
            .unwrap();

        let diff = compute_diff(&requirer, id).await.unwrap();
        assert_eq!(diff.added, ["container".to_string(), "path".to_string()].into());
        assert!(diff.changed.is_empty());
        assert!(diff.deleted.is_empty());
    }

    #[tokio::test]
    async fn test_compute_diff_is_idempotent() {
        let model = InMemoryModel::new();
        model.set_leader("azure-integrator", true);
        let id = model.join("azure-credentials", "azure-integrator", "analytics");
        let provider = model.handle("azure-integrator");
        let requirer = model.handle("analytics");

        provider
            .write_bag(id, Bucket::LocalApp, &image(&[("container", "c1")]))
            .await
            .unwrap();

        let first = compute_diff(&requirer, id).await.unwrap();
        assert!(!first.is_empty());
        let second = compute_diff(&requirer, id).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_compute_diff_treats_corrupt_snapshot_as_absent() {
        let model = InMemoryModel::new();
        model.set_leader("azure-integrator", true);
        let id = model.join("azure-credentials", "azure-integrator", "analytics");
        let provider = model.handle("azure-integrator");
        let requirer = model.handle("analytics");

        provider
            .write_bag(id, Bucket::LocalApp, &image(&[("container", "c1")]))
            .await
            .unwrap();
        assert!(!compute_diff(&requirer, id).await.unwrap().is_empty());

        // Clobber the snapshot with something undecodable
        requirer
            .write_bag(id, Bucket::LocalUnit, &image(&[(SNAPSHOT_KEY, "{not json")]))
            .await
            .unwrap();

        let diff = compute_diff(&requirer, id).await.unwrap();
        assert_eq!(diff.added, ["container".to_string()].into());
    }
}
