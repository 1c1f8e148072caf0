//! Credential directory: one flat file per credential
//!
//! Each file holds an opaque blob (usually a pasted cookie header) from which
//! the session secret is extracted by pattern match. Filenames only need to be
//! unique; the pool maps them to credential identities itself. New files are
//! written atomically (temp file + rename) with 0600 permissions so the watcher
//! never observes a half-written secret.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use common::Secret;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::session::{credential_id, extract_session_token};

/// Documentation file operators may keep next to the credentials.
pub const README_FILE: &str = "README.md";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// A credential file whose session secret was successfully extracted.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub file_name: String,
    pub id: String,
    pub secret: Secret<String>,
}

/// Handle on the credential directory.
#[derive(Debug, Clone)]
pub struct CredentialDir {
    dir: PathBuf,
}

impl CredentialDir {
    /// Open the credential directory, creating it if missing.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Io(format!("creating credential dir {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Whether a filename is excluded from credential handling.
    ///
    /// Hidden files (including our own temp files) and the README are skipped.
    pub fn is_ignored(file_name: &str) -> bool {
        file_name.starts_with('.') || file_name.eq_ignore_ascii_case(README_FILE)
    }

    /// Read every credential file in the directory.
    ///
    /// Unreadable files and files without a session secret are logged and
    /// skipped; only a failure to list the directory is an error.
    pub async fn scan(&self) -> Result<Vec<StoredCredential>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::Io(format!("reading credential dir: {e}")))?;

        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Io(format!("reading credential dir entry: {e}")))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if Self::is_ignored(&file_name) {
                continue;
            }
            match self.read(&file_name).await {
                Ok(Some(stored)) => found.push(stored),
                Ok(None) => {}
                Err(e) => warn!(file = %file_name, error = %e, "skipping unreadable credential file"),
            }
        }
        Ok(found)
    }

    /// Read one credential file by name.
    ///
    /// Returns `Ok(None)` when the file holds no recognizable session secret.
    pub async fn read(&self, file_name: &str) -> Result<Option<StoredCredential>> {
        let path = self.dir.join(file_name);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::Io(format!("reading {}: {e}", path.display())))?;

        match extract_session_token(&contents) {
            Some(secret) => Ok(Some(StoredCredential {
                file_name: file_name.to_string(),
                id: credential_id(&secret),
                secret: Secret::new(secret),
            })),
            None => {
                warn!(file = %file_name, "no session token found in credential file");
                Ok(None)
            }
        }
    }

    /// Filename used for a credential added through the admin surface.
    pub fn file_name_for(id: &str) -> String {
        let prefix: String = id.chars().take(16).collect();
        format!("{prefix}.txt")
    }

    /// Persist raw operator input as a new credential file.
    ///
    /// Returns the filename written.
    pub async fn write_new(&self, id: &str, raw: &str) -> Result<String> {
        let file_name = Self::file_name_for(id);
        let path = self.dir.join(&file_name);
        let tmp_path = self
            .dir
            .join(format!(
                ".{file_name}.tmp.{}.{}",
                std::process::id(),
                TMP_SEQ.fetch_add(1, Ordering::Relaxed)
            ));

        tokio::fs::write(&tmp_path, raw.as_bytes())
            .await
            .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&tmp_path, perms)
                .await
                .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
        }

        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

        debug!(file = %file_name, "persisted credential file");
        Ok(file_name)
    }

    /// Delete a credential file. Returns whether a file was removed.
    pub async fn delete(&self, file_name: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.dir.join(file_name)).await {
            Ok(()) => {
                debug!(file = %file_name, "deleted credential file");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(format!("deleting {file_name}: {e}"))),
        }
    }
}
