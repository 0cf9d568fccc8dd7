//! On-disk label stores: drafts, finals, backups and profiles.
//!
//! ```text
//! outputs/
//! ├── cluster_labels/            drafts   cluster_<id>_label_draft.json
//! │   └── finals/                finals   cluster_<id>_label.json
//! ├── cluster_backups/           backups  <draft name>, <stem>.rev<N>.json
//! ├── profiles/                  profiles cluster_<id>.md
//! └── review_summary.txt
//! ```
//!
//! Nothing here deletes a file that has not first been copied to the backup
//! store, and nothing overwrites a final unless the caller says so.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LabelError, Result};
use crate::record::ClusterLabelRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelStoreLayout {
    pub drafts_dir: PathBuf,
    pub finals_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub summary_path: PathBuf,
}

impl Default for LabelStoreLayout {
    fn default() -> Self {
        Self::under("outputs")
    }
}

impl LabelStoreLayout {
    /// Standard layout rooted at `root`.
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            drafts_dir: root.join("cluster_labels"),
            finals_dir: root.join("cluster_labels").join("finals"),
            backups_dir: root.join("cluster_backups"),
            profiles_dir: root.join("profiles"),
            summary_path: root.join("review_summary.txt"),
        }
    }
}

pub fn draft_file_name(cluster_id: u32) -> String {
    format!("cluster_{cluster_id}_label_draft.json")
}

pub fn final_file_name(cluster_id: u32) -> String {
    format!("cluster_{cluster_id}_label.json")
}

pub fn profile_file_name(cluster_id: u32) -> String {
    format!("cluster_{cluster_id}.md")
}

/// A draft on disk: its file name plus the parsed record, or the reason it
/// could not be parsed.
#[derive(Debug)]
pub struct DraftEntry {
    pub file_name: String,
    pub record: Result<ClusterLabelRecord>,
}

#[derive(Debug, Clone)]
pub struct LabelStore {
    layout: LabelStoreLayout,
}

impl LabelStore {
    /// Open the stores, creating missing directories.
    pub fn open(layout: LabelStoreLayout) -> Result<Self> {
        for dir in [
            &layout.drafts_dir,
            &layout.finals_dir,
            &layout.backups_dir,
            &layout.profiles_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(Self { layout })
    }

    pub fn layout(&self) -> &LabelStoreLayout {
        &self.layout
    }

    pub fn draft_path(&self, file_name: &str) -> PathBuf {
        self.layout.drafts_dir.join(file_name)
    }

    pub fn final_path(&self, cluster_id: u32) -> PathBuf {
        self.layout.finals_dir.join(final_file_name(cluster_id))
    }

    pub fn backup_path(&self, file_name: &str) -> PathBuf {
        self.layout.backups_dir.join(file_name)
    }

    pub fn profile_path(&self, cluster_id: u32) -> PathBuf {
        self.layout.profiles_dir.join(profile_file_name(cluster_id))
    }

    /// Draft file names, sorted. Only `.json` files whose name contains
    /// `draft` count; anything else in the directory is ignored.
    pub fn list_drafts(&self) -> Result<Vec<String>> {
        list_json(&self.layout.drafts_dir, |name| name.to_lowercase().contains("draft"))
    }

    pub fn read_draft(&self, file_name: &str) -> Result<ClusterLabelRecord> {
        let bytes = fs::read(self.draft_path(file_name))?;
        ClusterLabelRecord::from_slice(file_name, &bytes)
    }

    /// Every draft, parsed. Malformed drafts are returned, not dropped, so a
    /// review pass can report them.
    pub fn load_drafts(&self) -> Result<Vec<DraftEntry>> {
        Ok(self
            .list_drafts()?
            .into_iter()
            .map(|file_name| {
                let record = self.read_draft(&file_name);
                DraftEntry { file_name, record }
            })
            .collect())
    }

    /// Write a fresh draft for `record.cluster_id`; returns its file name.
    /// A draft already on disk for the cluster is copied to the backup store
    /// first.
    pub fn write_draft(&self, record: &ClusterLabelRecord) -> Result<String> {
        let file_name = draft_file_name(record.cluster_id);
        if self.draft_path(&file_name).is_file() {
            let backup = self.backup_revision(&file_name)?;
            tracing::info!(
                cluster_id = record.cluster_id,
                backup = %backup.display(),
                "replacing existing draft"
            );
        }
        self.replace_draft(&file_name, record)?;
        Ok(file_name)
    }

    /// Re-persist an existing draft after an edit. The previous bytes are
    /// copied to the backup store first.
    pub fn rewrite_draft(&self, file_name: &str, record: &ClusterLabelRecord) -> Result<PathBuf> {
        let backup = self.backup_revision(file_name)?;
        self.replace_draft(file_name, record)?;
        Ok(backup)
    }

    pub fn final_exists(&self, cluster_id: u32) -> bool {
        self.final_path(cluster_id).is_file()
    }

    /// Copy the draft byte-for-byte into the backup store, then move it into
    /// the finals store. An existing final for the cluster is copied to
    /// `cluster_<id>_label.rev<N>.json` in the backup store before it is
    /// replaced. Backups are never overwritten: when `file_name` is already
    /// taken there, the draft goes to its next free revision name.
    pub fn promote(&self, file_name: &str, cluster_id: u32) -> Result<PathBuf> {
        let draft = self.draft_path(file_name);
        let backup = match self.backup_path(file_name) {
            path if path.exists() => self.revision_path(file_name),
            path => path,
        };
        fs::copy(&draft, &backup)?;
        let final_path = self.final_path(cluster_id);
        if final_path.is_file() {
            let retired = self.revision_path(&final_file_name(cluster_id));
            fs::copy(&final_path, &retired)?;
            tracing::info!(
                cluster_id,
                backup = %retired.display(),
                "previous final backed up"
            );
        }
        if fs::rename(&draft, &final_path).is_err() {
            // Cross-device moves fall back to copy-then-remove; the backup
            // already holds the bytes.
            fs::copy(&draft, &final_path)?;
            fs::remove_file(&draft)?;
        }
        tracing::info!(
            draft = %draft.display(),
            backup = %backup.display(),
            final_path = %final_path.display(),
            "draft promoted"
        );
        Ok(final_path)
    }

    /// Final records, sorted by file name. Malformed ones are returned as errors.
    pub fn load_finals(&self) -> Result<Vec<(String, Result<ClusterLabelRecord>)>> {
        let names = list_json(&self.layout.finals_dir, |_| true)?;
        Ok(names
            .into_iter()
            .map(|name| {
                let record = fs::read(self.layout.finals_dir.join(&name))
                    .map_err(LabelError::from)
                    .and_then(|bytes| ClusterLabelRecord::from_slice(&name, &bytes));
                (name, record)
            })
            .collect())
    }

    pub fn write_profile(&self, cluster_id: u32, markdown: &str) -> Result<PathBuf> {
        let path = self.profile_path(cluster_id);
        fs::write(&path, markdown)?;
        Ok(path)
    }

    pub fn write_summary(&self, text: &str) -> Result<()> {
        if let Some(parent) = self.layout.summary_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.layout.summary_path, text)?;
        Ok(())
    }

    fn replace_draft(&self, file_name: &str, record: &ClusterLabelRecord) -> Result<()> {
        let path = self.draft_path(file_name);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, record.to_pretty_json()?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// `<stem>.rev<N>.json` in the backup store with the next free `N`.
    fn revision_path(&self, file_name: &str) -> PathBuf {
        let stem = file_name.strip_suffix(".json").unwrap_or(file_name);
        let mut revision = 1u32;
        loop {
            let candidate = self.backup_path(&format!("{stem}.rev{revision}.json"));
            if !candidate.exists() {
                return candidate;
            }
            revision += 1;
        }
    }

    /// Copy the current draft to its next revision name.
    fn backup_revision(&self, file_name: &str) -> Result<PathBuf> {
        let target = self.revision_path(file_name);
        fs::copy(self.draft_path(file_name), &target)?;
        tracing::debug!(backup = %target.display(), "draft revision backed up");
        Ok(target)
    }
}

fn list_json(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.ends_with(".json") && keep(&name) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> LabelStore {
        LabelStore::open(LabelStoreLayout::under(dir)).unwrap()
    }

    #[test]
    fn only_draft_json_files_are_listed() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.write_draft(&ClusterLabelRecord::new(3)).unwrap();
        store.write_draft(&ClusterLabelRecord::new(1)).unwrap();
        fs::write(store.layout().drafts_dir.join("notes.json"), "{}").unwrap();
        fs::write(store.layout().drafts_dir.join("cluster_9_draft.txt"), "x").unwrap();

        assert_eq!(
            store.list_drafts().unwrap(),
            vec!["cluster_1_label_draft.json", "cluster_3_label_draft.json"]
        );
    }

    #[test]
    fn rewrite_keeps_numbered_revisions() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let mut record = ClusterLabelRecord::new(0);
        let name = store.write_draft(&record).unwrap();
        let original = fs::read(store.draft_path(&name)).unwrap();

        record.label = Some("First".into());
        let rev1 = store.rewrite_draft(&name, &record).unwrap();
        record.label = Some("Second".into());
        let rev2 = store.rewrite_draft(&name, &record).unwrap();

        assert!(rev1.ends_with("cluster_0_label_draft.rev1.json"));
        assert!(rev2.ends_with("cluster_0_label_draft.rev2.json"));
        assert_eq!(fs::read(rev1).unwrap(), original);
        assert_eq!(store.read_draft(&name).unwrap().label.as_deref(), Some("Second"));
    }

    #[test]
    fn promote_backs_up_then_moves() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let name = store.write_draft(&ClusterLabelRecord::new(4)).unwrap();
        let bytes = fs::read(store.draft_path(&name)).unwrap();

        let final_path = store.promote(&name, 4).unwrap();
        assert!(!store.draft_path(&name).exists());
        assert!(store.final_exists(4));
        assert_eq!(fs::read(&final_path).unwrap(), bytes);
        assert_eq!(fs::read(store.backup_path(&name)).unwrap(), bytes);

        let finals = store.load_finals().unwrap();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].1.as_ref().unwrap().cluster_id, 4);
    }

    #[test]
    fn promoting_over_a_final_keeps_every_prior_version() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let mut record = ClusterLabelRecord::new(2);
        record.label = Some("First".into());
        let name = store.write_draft(&record).unwrap();
        let first = fs::read(store.draft_path(&name)).unwrap();
        store.promote(&name, 2).unwrap();

        record.label = Some("Second".into());
        store.write_draft(&record).unwrap();
        let second = fs::read(store.draft_path(&name)).unwrap();
        store.promote(&name, 2).unwrap();

        let backups = &store.layout().backups_dir;
        assert_eq!(fs::read(store.backup_path(&name)).unwrap(), first);
        assert_eq!(fs::read(backups.join("cluster_2_label_draft.rev1.json")).unwrap(), second);
        assert_eq!(fs::read(backups.join("cluster_2_label.rev1.json")).unwrap(), first);
        assert_eq!(fs::read(store.final_path(2)).unwrap(), second);
    }

    #[test]
    fn redrafting_backs_up_the_existing_draft() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let mut record = ClusterLabelRecord::new(1);
        let name = store.write_draft(&record).unwrap();
        record.label = Some("Human Edit".into());
        store.rewrite_draft(&name, &record).unwrap();
        let edited = fs::read(store.draft_path(&name)).unwrap();

        store.write_draft(&ClusterLabelRecord::new(1)).unwrap();
        assert_eq!(store.read_draft(&name).unwrap().label, None);
        assert_eq!(
            fs::read(store.layout().backups_dir.join("cluster_1_label_draft.rev2.json")).unwrap(),
            edited
        );
    }
}
