use super::request::RepairRequest;
use crate::error::AssetError;
use crate::model::now_micros;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{error, info};

const PREFIX: &str = "repair-";
const SUFFIX: &str = ".bin";

/// Overflow storage for the repair queue: MessagePack files named
/// `repair-<micros>.bin`, consumed newest first.
#[derive(Debug, Clone)]
pub struct SpillStore {
    dir: PathBuf,
}

impl SpillStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, requests: &[RepairRequest]) -> Result<PathBuf, AssetError> {
        fs::create_dir_all(&self.dir)?;
        let encoded = rmp_serde::to_vec(requests).map_err(|e| AssetError::Encode(e.to_string()))?;
        let mut stamp = now_micros();
        let mut path = self.path_for(stamp);
        while path.exists() {
            stamp += 1;
            path = self.path_for(stamp);
        }
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&encoded)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| AssetError::Io(e.error))?;
        info!(
            path = %path.display(),
            requests = requests.len(),
            "repair requests spilled to disk"
        );
        Ok(path)
    }

    /// Read and delete the newest spill file. An undecodable file is renamed
    /// to `*.corrupt` so it is not picked up again.
    pub fn load_latest(&self) -> Result<Option<Vec<RepairRequest>>, AssetError> {
        let Some(path) = self.files()?.pop() else {
            return Ok(None);
        };
        let bytes = fs::read(&path)?;
        match rmp_serde::from_slice::<Vec<RepairRequest>>(&bytes) {
            Ok(requests) => {
                fs::remove_file(&path)?;
                info!(
                    path = %path.display(),
                    requests = requests.len(),
                    "spilled repair requests reloaded"
                );
                Ok(Some(requests))
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "unreadable repair spill file");
                fs::rename(&path, path.with_extension("corrupt"))?;
                Err(AssetError::Decode(e.to_string()))
            }
        }
    }

    pub fn has_files(&self) -> bool {
        self.files().is_ok_and(|files| !files.is_empty())
    }

    /// Spill files sorted oldest first.
    fn files(&self) -> Result<Vec<PathBuf>, AssetError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_spill = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(PREFIX) && name.ends_with(SUFFIX));
            if is_spill {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn path_for(&self, stamp: u64) -> PathBuf {
        self.dir.join(format!("{PREFIX}{stamp:020}{SUFFIX}"))
    }
}

#[cfg(test)]
mod tests {
    use super::SpillStore;
    use crate::error::AssetErrorCode;
    use crate::model::{ResourceId, ResourceKind};
    use crate::repair::request::RepairRequest;

    fn request(n: u32) -> RepairRequest {
        RepairRequest::reindex(ResourceId::for_kind(ResourceKind::Item, n), ResourceKind::Item, 7)
    }

    #[test]
    fn newest_file_is_loaded_first_and_removed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spill = SpillStore::new(dir.path().join("spill"));
        assert!(!spill.has_files());
        assert_eq!(spill.load_latest().expect("empty"), None);

        spill.write(&[request(1)]).expect("first");
        spill.write(&[request(2), request(3)]).expect("second");
        assert!(spill.has_files());

        let newest = spill.load_latest().expect("load").expect("file");
        assert_eq!(newest, vec![request(2), request(3)]);
        let older = spill.load_latest().expect("load").expect("file");
        assert_eq!(older, vec![request(1)]);
        assert!(!spill.has_files());
    }

    #[test]
    fn corrupt_files_are_set_aside() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spill = SpillStore::new(dir.path());
        std::fs::write(dir.path().join("repair-00000000000000000001.bin"), b"\xc1garbage")
            .expect("write");
        let err = spill.load_latest().expect_err("corrupt");
        assert_eq!(err.code(), AssetErrorCode::Decode);
        assert!(!spill.has_files());
        assert!(dir.path().join("repair-00000000000000000001.corrupt").exists());
    }
}
