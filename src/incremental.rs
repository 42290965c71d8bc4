use std::{collections::HashSet, path::Path};

use crate::{
    registry::DocumentRegistry,
    vector_index::VectorIndex,
    walker::DiscoveredFile,
};

/// What a reconciliation pass has to do, computed before anything changes.
#[derive(Debug, Default)]
pub struct SyncPlan {
    /// Paths never seen before.
    pub new_files: Vec<DiscoveredFile>,
    /// Registered documents whose modification time moved.
    pub modified: Vec<(u64, DiscoveredFile)>,
    /// Registered documents with no vectors in the index, e.g. after an
    /// interrupted pass. They are re-indexed under the same id.
    pub repair: Vec<(u64, DiscoveredFile)>,
    /// Registered documents whose path is gone from disk.
    pub deleted_ids: Vec<u64>,
    /// Index ranges that belong to no registered document.
    pub orphan_ids: Vec<u64>,
    pub unchanged: usize,
}

impl SyncPlan {
    /// Whether the pass would leave the index and registry as they are.
    pub fn is_noop(&self) -> bool {
        self.new_files.is_empty()
            && self.modified.is_empty()
            && self.repair.is_empty()
            && self.deleted_ids.is_empty()
            && self.orphan_ids.is_empty()
    }
}

/// Compare discovered files against the registry and the index.
///
/// A registered path that the walk did not report is only treated as
/// deleted when it no longer exists on disk; paths that merely fell out of
/// the filter are left registered.
pub fn plan_sync(
    registry: &DocumentRegistry,
    index: &VectorIndex,
    discovered: &[DiscoveredFile],
) -> SyncPlan {
    let mut plan = SyncPlan::default();
    let mut seen = HashSet::with_capacity(discovered.len());

    for file in discovered {
        let key = file.key();
        match registry.lookup_by_path(&key) {
            None => plan.new_files.push(file.clone()),
            Some((doc_id, meta)) => {
                if meta.last_modified != file.mtime {
                    plan.modified.push((doc_id, file.clone()));
                } else if !index.has_document(doc_id) {
                    plan.repair.push((doc_id, file.clone()));
                } else {
                    plan.unchanged += 1;
                }
            }
        }
        seen.insert(key);
    }

    for (doc_id, meta) in registry.iter() {
        if !seen.contains(&meta.path) && !Path::new(&meta.path).exists() {
            plan.deleted_ids.push(doc_id);
        }
    }

    plan.orphan_ids = index
        .doc_ids()
        .into_iter()
        .filter(|doc| !registry.contains(*doc))
        .collect();

    plan
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{
        doc_id::{Modality, pack},
        registry::DocumentMetadata,
    };

    fn file(dir: &Path, name: &str, mtime: u64) -> DiscoveredFile {
        DiscoveredFile {
            relative_path: PathBuf::from(name),
            absolute_path: dir.join(name),
            mtime,
            size: 1,
            extension: "txt".to_string(),
        }
    }

    fn register(
        registry: &mut DocumentRegistry,
        index: &mut VectorIndex,
        file: &DiscoveredFile,
    ) -> u64 {
        let doc = registry
            .allocate(DocumentMetadata::from_discovered(file))
            .unwrap();
        index
            .insert(vec![vec![1.0]], &[pack(doc, Modality::Text, 0).unwrap()])
            .unwrap();
        doc
    }

    #[test]
    fn classifies_new_modified_and_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let mut registry = DocumentRegistry::new();
        let mut index = VectorIndex::new();

        let same = file(tmp.path(), "same.txt", 10);
        let touched = file(tmp.path(), "touched.txt", 10);
        register(&mut registry, &mut index, &same);
        let touched_id = register(&mut registry, &mut index, &touched);

        let discovered = vec![
            same.clone(),
            file(tmp.path(), "touched.txt", 11),
            file(tmp.path(), "fresh.txt", 5),
        ];
        let plan = plan_sync(&registry, &index, &discovered);

        assert_eq!(plan.unchanged, 1);
        assert_eq!(plan.new_files.len(), 1);
        assert_eq!(plan.new_files[0].relative_path, PathBuf::from("fresh.txt"));
        assert_eq!(plan.modified.len(), 1);
        assert_eq!(plan.modified[0].0, touched_id);
        assert!(plan.deleted_ids.is_empty());
        assert!(!plan.is_noop());
    }

    #[test]
    fn missing_paths_are_deleted_but_unseen_existing_paths_are_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let mut registry = DocumentRegistry::new();
        let mut index = VectorIndex::new();

        let gone = file(tmp.path(), "gone.txt", 1);
        let filtered = file(tmp.path(), "filtered.txt", 1);
        std::fs::write(&filtered.absolute_path, "still here").unwrap();
        let gone_id = register(&mut registry, &mut index, &gone);
        register(&mut registry, &mut index, &filtered);

        let plan = plan_sync(&registry, &index, &[]);
        assert_eq!(plan.deleted_ids, vec![gone_id]);
    }

    #[test]
    fn empty_range_is_repaired_and_orphans_are_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let mut registry = DocumentRegistry::new();
        let mut index = VectorIndex::new();

        let a = file(tmp.path(), "a.txt", 1);
        let doc = registry
            .allocate(DocumentMetadata::from_discovered(&a))
            .unwrap();
        index
            .insert(vec![vec![1.0]], &[pack(doc + 1, Modality::Text, 0).unwrap()])
            .unwrap();

        let plan = plan_sync(&registry, &index, &[a]);
        assert_eq!(plan.repair.len(), 1);
        assert_eq!(plan.repair[0].0, doc);
        assert_eq!(plan.orphan_ids, vec![doc + 1]);
        assert_eq!(plan.unchanged, 0);
    }

    #[test]
    fn steady_state_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let mut registry = DocumentRegistry::new();
        let mut index = VectorIndex::new();
        let a = file(tmp.path(), "a.txt", 1);
        register(&mut registry, &mut index, &a);

        let plan = plan_sync(&registry, &index, &[a]);
        assert!(plan.is_noop());
        assert_eq!(plan.unchanged, 1);
    }
}
