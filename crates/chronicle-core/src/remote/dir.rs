use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rand::RngCore;
use tracing::debug;

use super::{PLACEHOLDER, RemoteError, SnapshotStore, is_placeholder};

/// Snapshots as files in a directory: `<root>/<id>.enc`.
///
/// Suits a folder already synced by other means (a network share, a cloud
/// drive) or a removable disk. Writes go through a temp file and a rename so
/// a reader never sees half a token.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, id: &str) -> Result<PathBuf, RemoteError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(RemoteError::NotFound { id: id.to_string() });
        }
        Ok(self.root.join(format!("{id}.enc")))
    }

    fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
        let mut temp_name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
        temp_name.push(".tmp");
        let temp = path.with_file_name(temp_name);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp, path)
    }
}

fn transport(err: &io::Error, path: &Path) -> RemoteError {
    RemoteError::Transport(format!("{}: {err}", path.display()))
}

impl SnapshotStore for DirStore {
    fn backend(&self) -> &'static str {
        "dir"
    }

    fn create(&self) -> Result<String, RemoteError> {
        fs::create_dir_all(&self.root).map_err(|e| transport(&e, &self.root))?;

        let mut suffix = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut suffix);
        let id = format!(
            "chronicle-{}",
            suffix.iter().map(|b| format!("{b:02x}")).collect::<String>()
        );

        let path = self.object_path(&id)?;
        Self::write_atomic(&path, PLACEHOLDER).map_err(|e| transport(&e, &path))?;
        debug!(path = %path.display(), "created snapshot file");
        Ok(id)
    }

    fn get(&self, id: &str) -> Result<String, RemoteError> {
        let path = self.object_path(id)?;
        match fs::read_to_string(&path) {
            Ok(content) if is_placeholder(&content) => {
                Err(RemoteError::NotFound { id: id.to_string() })
            }
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(RemoteError::NotFound { id: id.to_string() })
            }
            Err(e) => Err(transport(&e, &path)),
        }
    }

    fn put(&self, id: &str, token: &str) -> Result<(), RemoteError> {
        let path = self.object_path(id)?;
        if !path.is_file() {
            return Err(RemoteError::NotFound { id: id.to_string() });
        }
        Self::write_atomic(&path, token).map_err(|e| transport(&e, &path))?;
        debug!(path = %path.display(), bytes = token.len(), "wrote snapshot file");
        Ok(())
    }
}
