//! Hot reload of the credential directory
//!
//! The notify callback runs on the watcher's own thread and only forwards raw
//! events into a channel; a single tokio task applies them in order. Loads are
//! delayed briefly so a file still being written is not read half-done.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use flow_client::{CredentialDir, StoredCredential};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::credential::Credential;
use crate::error::{Error, Result};
use crate::pool::Pool;

/// Delay before reading a created or modified file.
pub const DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WatchAction {
    /// (Re)read the file; a missing file is treated as removed.
    Load(String),
    Remove(String),
}

fn file_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if CredentialDir::is_ignored(name) {
        return None;
    }
    Some(name.to_string())
}

/// Translate one notify event into pool actions.
pub(crate) fn classify(event: &Event) -> Vec<WatchAction> {
    let names = || event.paths.iter().filter_map(|p| file_name(p));
    match event.kind {
        EventKind::Create(_) => names().map(WatchAction::Load).collect(),
        EventKind::Remove(_) => names().map(WatchAction::Remove).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            names().map(WatchAction::Remove).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            names().map(WatchAction::Load).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut actions = Vec::new();
            if let Some(from) = event.paths.first().and_then(|p| file_name(p)) {
                actions.push(WatchAction::Remove(from));
            }
            if let Some(to) = event.paths.get(1).and_then(|p| file_name(p)) {
                actions.push(WatchAction::Load(to));
            }
            actions
        }
        // Metadata-only changes do not alter the secret
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        // Includes renames of unknown direction: existence is checked on load
        EventKind::Modify(_) => names().map(WatchAction::Load).collect(),
        _ => Vec::new(),
    }
}

impl Pool {
    /// Start watching the credential directory for changes.
    pub fn start_file_watch(self: &Arc<Self>) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res| {
            // Receiver gone means the pool is stopping
            let _ = tx.send(res);
        })
        .map_err(|e| Error::Watch(e.to_string()))?;
        watcher
            .watch(self.store.path(), RecursiveMode::NonRecursive)
            .map_err(|e| Error::Watch(e.to_string()))?;

        *self.watcher.lock().unwrap_or_else(|p| p.into_inner()) = Some(watcher);

        let pool = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                if *shutdown.borrow_and_update() {
                    break;
                }
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(Ok(event)) => {
                            for action in classify(&event) {
                                pool.apply_watch_action(action).await;
                            }
                        }
                        Some(Err(e)) => warn!(error = %e, "credential watcher error"),
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            debug!("credential watcher exited");
        });
        self.track(handle);

        info!(dir = %self.store.path().display(), "watching credential directory");
        Ok(())
    }

    async fn apply_watch_action(&self, action: WatchAction) {
        match action {
            WatchAction::Load(name) => {
                tokio::time::sleep(DEBOUNCE).await;
                self.reload_file(&name).await;
            }
            WatchAction::Remove(name) => self.remove_by_file(&name).await,
        }
    }

    /// Re-read one file and bring the registry in line with it.
    pub(crate) async fn reload_file(&self, name: &str) {
        match self.store.read(name).await {
            Ok(Some(stored)) => self.register_file(stored).await,
            Ok(None) => self.remove_by_file(name).await,
            Err(e) => {
                let exists = tokio::fs::try_exists(self.store.path().join(name))
                    .await
                    .unwrap_or(false);
                if exists {
                    warn!(file = %name, error = %e, "failed to read changed credential file");
                } else {
                    self.remove_by_file(name).await;
                }
            }
        }
    }

    /// Map `file_name` to the credential it now holds.
    ///
    /// A file whose identity changed drops the old credential (unless another
    /// file still backs it) and registers the new one with a background refresh.
    async fn register_file(&self, stored: StoredCredential) {
        let StoredCredential { file_name, id, secret } = stored;
        let added = {
            let mut registry = self.registry.write().await;
            let previous = registry.files.insert(file_name.clone(), id.clone());
            if previous.as_deref() == Some(id.as_str()) && registry.credentials.contains_key(&id) {
                return;
            }

            if let Some(old) = previous.filter(|old| *old != id) {
                if !registry.is_backed_elsewhere(&old, &file_name) {
                    registry.credentials.remove(&old);
                    info!(file = %file_name, old = %common::mask(&old), new = %common::mask(&id), "credential file changed identity");
                }
            }

            if registry.credentials.contains_key(&id) {
                None
            } else {
                let credential = Arc::new(Credential::new(id.clone(), secret));
                registry.credentials.insert(id.clone(), credential.clone());
                Some(credential)
            }
        };

        if let Some(credential) = added {
            info!(credential = %credential.masked_id(), file = %file_name, "credential loaded from watched file");
            self.spawn_refresh(credential);
        }
    }

    /// Forget the credential mapped to `file_name`, if any.
    pub(crate) async fn remove_by_file(&self, file_name: &str) {
        let mut registry = self.registry.write().await;
        let Some(id) = registry.files.remove(file_name) else {
            return;
        };
        if registry.is_backed_elsewhere(&id, file_name) {
            return;
        }
        if registry.credentials.remove(&id).is_some() {
            info!(credential = %common::mask(&id), file = %file_name, "credential file removed");
        }
    }
}
