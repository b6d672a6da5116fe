use crate::foundation::{now_nanos, KeepId, NodeError, Result};
use crate::infrastructure::persistence::Persistence;
use log::warn;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const CURRENT_DIR: &str = "current";
const ARCHIVE_DIR: &str = "archive";
const SNAPSHOT_EXTENSION: &str = "bin";

/// File-backed persistence: one snapshot file per keep under
/// `<root>/current`, moved to `<root>/archive` on unregistration.
///
/// Writes go through a temporary file, are synced, and are renamed into
/// place, so a snapshot is either fully present or absent after a crash.
pub struct DiskPersistence {
    current_dir: PathBuf,
    archive_dir: PathBuf,
}

impl DiskPersistence {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let current_dir = root.join(CURRENT_DIR);
        let archive_dir = root.join(ARCHIVE_DIR);
        fs::create_dir_all(&current_dir)?;
        fs::create_dir_all(&archive_dir)?;
        Ok(Self { current_dir, archive_dir })
    }

    fn snapshot_path(&self, keep_id: &KeepId) -> PathBuf {
        self.current_dir.join(format!("{keep_id}.{SNAPSHOT_EXTENSION}"))
    }
}

impl Persistence for DiskPersistence {
    fn save(&self, keep_id: &KeepId, snapshot: &[u8]) -> Result<()> {
        let target = self.snapshot_path(keep_id);
        let staged = self.current_dir.join(format!("{keep_id}.{SNAPSHOT_EXTENSION}.tmp"));

        let mut file = fs::File::create(&staged)?;
        file.write_all(snapshot)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&staged, &target)?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<(KeepId, Vec<u8>)>> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.current_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let keep_id: KeepId = match stem.parse() {
                Ok(keep_id) => keep_id,
                Err(err) => {
                    warn!("skipping snapshot with unparseable name path={} error={}", path.display(), err);
                    continue;
                }
            };
            snapshots.push((keep_id, fs::read(&path)?));
        }
        Ok(snapshots)
    }

    fn archive(&self, keep_id: &KeepId) -> Result<()> {
        let source = self.snapshot_path(keep_id);
        if !source.exists() {
            return Ok(());
        }
        let target = self.archive_dir.join(format!("{keep_id}-{}.{SNAPSHOT_EXTENSION}", now_nanos()));
        fs::rename(&source, &target).map_err(|err| NodeError::Storage {
            operation: format!("archive snapshot for keep {keep_id}"),
            details: err.to_string(),
        })?;
        Ok(())
    }

    fn has(&self, keep_id: &KeepId) -> Result<bool> {
        Ok(self.snapshot_path(keep_id).exists())
    }
}
