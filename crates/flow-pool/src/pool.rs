//! Credential registry and round-robin selection
//!
//! Two lock scopes: the pool-wide `RwLock` guards only the map structure
//! (identity → credential, filename → identity) and is held just long enough
//! to read or update it. Everything a refresh touches lives behind the
//! credential's own mutex, so refreshing one credential never blocks another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::Secret;
use flow_client::{CredentialDir, StoredCredential, Transport, credential_id, extract_session_token};
use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::credential::{Credential, CredentialSummary, ERROR_THRESHOLD};
use crate::error::{Error, Result};

/// Snapshot of pool health.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub ready: usize,
    pub disabled: usize,
    /// Not disabled, but at or over the error threshold.
    pub errored: usize,
    pub credentials: Vec<CredentialSummary>,
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    pub(crate) credentials: HashMap<String, Arc<Credential>>,
    /// Backing filename → identity.
    pub(crate) files: HashMap<String, String>,
}

impl Registry {
    /// Whether any file other than `except` still maps to `id`.
    pub(crate) fn is_backed_elsewhere(&self, id: &str, except: &str) -> bool {
        self.files
            .iter()
            .any(|(file, mapped)| file != except && mapped == id)
    }
}

/// In-memory credential pool synchronized with the credential directory.
pub struct Pool {
    pub(crate) store: CredentialDir,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) registry: RwLock<Registry>,
    next_index: AtomicUsize,
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    pub(crate) watcher: std::sync::Mutex<Option<notify::RecommendedWatcher>>,
}

impl Pool {
    pub fn new(store: CredentialDir, transport: Arc<dyn Transport>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            transport,
            registry: RwLock::new(Registry::default()),
            next_index: AtomicUsize::new(0),
            shutdown,
            workers: std::sync::Mutex::new(Vec::new()),
            watcher: std::sync::Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Scan the credential directory and register anything new.
    ///
    /// Returns the number of credentials added. Re-running never duplicates;
    /// files that repeat a known secret are recorded in the file index only.
    pub async fn load(&self) -> Result<usize> {
        let found = self
            .store
            .scan()
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        let mut loaded = 0;
        let mut registry = self.registry.write().await;
        for StoredCredential { file_name, id, secret } in found {
            registry.files.insert(file_name.clone(), id.clone());
            if registry.credentials.contains_key(&id) {
                continue;
            }
            debug!(credential = %common::mask(&id), file = %file_name, "registered credential");
            registry
                .credentials
                .insert(id.clone(), Arc::new(Credential::new(id, secret)));
            loaded += 1;
        }
        let total = registry.credentials.len();
        drop(registry);

        info!(loaded, total, dir = %self.store.path().display(), "credential directory loaded");
        Ok(loaded)
    }

    /// Register a credential from pasted operator input and persist it.
    ///
    /// Returns the new credential's identity. Its first access token is fetched
    /// in the background.
    pub async fn add_from_raw_input(&self, raw: &str) -> Result<String> {
        let secret = extract_session_token(raw).ok_or(Error::NoSecretFound)?;
        let id = credential_id(&secret);

        if self.registry.read().await.credentials.contains_key(&id) {
            return Err(Error::DuplicateCredential(common::mask(&id)));
        }

        let file_name = self
            .store
            .write_new(&id, raw)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        let credential = {
            let mut registry = self.registry.write().await;
            // Lost a race with a concurrent add or the watcher picking up the file
            if registry.credentials.contains_key(&id) {
                registry.files.insert(file_name, id.clone());
                return Err(Error::DuplicateCredential(common::mask(&id)));
            }
            let credential = Arc::new(Credential::new(id.clone(), Secret::new(secret)));
            registry.credentials.insert(id.clone(), credential.clone());
            registry.files.insert(file_name.clone(), id.clone());
            credential
        };

        info!(credential = %credential.masked_id(), file = %file_name, "credential added");
        self.spawn_refresh(credential);
        Ok(id)
    }

    /// Drop a credential and delete its backing file(s).
    ///
    /// `id` may be the full identity or an unambiguous prefix of it (such as
    /// the masked form shown in stats).
    pub async fn remove(&self, id: &str) -> Result<()> {
        let (id, files) = {
            let mut registry = self.registry.write().await;
            let id = resolve(&registry, id)?;
            registry.credentials.remove(&id);
            let files: Vec<String> = registry
                .files
                .iter()
                .filter(|(_, mapped)| **mapped == id)
                .map(|(file, _)| file.clone())
                .collect();
            for file in &files {
                registry.files.remove(file);
            }
            (id, files)
        };

        let files = if files.is_empty() {
            vec![CredentialDir::file_name_for(&id)]
        } else {
            files
        };
        for file in &files {
            if let Err(e) = self.store.delete(file).await {
                warn!(credential = %common::mask(&id), file = %file, error = %e, "failed to delete credential file");
            }
        }

        info!(credential = %common::mask(&id), "credential removed");
        Ok(())
    }

    /// Pick a selectable credential.
    ///
    /// Round-robin over identities in sorted order, skipping anything disabled
    /// or at the error threshold.
    pub async fn select(&self) -> Result<Arc<Credential>> {
        let candidates = self.sorted_credentials().await;
        let n = candidates.len();
        if n == 0 {
            return Err(Error::NoneAvailable);
        }

        let start = self.next_index.fetch_add(1, Ordering::Relaxed) % n;
        for offset in 0..n {
            let credential = &candidates[(start + offset) % n];
            if credential.is_ready().await {
                debug!(credential = %credential.masked_id(), "selected credential");
                return Ok(credential.clone());
            }
        }
        Err(Error::NoneAvailable)
    }

    /// Look up a credential by full identity or unambiguous prefix.
    pub async fn get(&self, id: &str) -> Result<Arc<Credential>> {
        let registry = self.registry.read().await;
        let id = resolve(&registry, id)?;
        registry
            .credentials
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound(common::mask(&id)))
    }

    /// Refresh one credential's access token now.
    pub async fn refresh(&self, id: &str) -> Result<()> {
        let credential = self.get(id).await?;
        credential
            .refresh(self.transport.as_ref())
            .await
            .map_err(|e| Error::RefreshFailed(e.to_string()))
    }

    pub async fn count(&self) -> usize {
        self.registry.read().await.credentials.len()
    }

    pub async fn ready_count(&self) -> usize {
        let mut ready = 0;
        for credential in self.sorted_credentials().await {
            if credential.is_ready().await {
                ready += 1;
            }
        }
        ready
    }

    pub async fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            total: 0,
            ready: 0,
            disabled: 0,
            errored: 0,
            credentials: Vec::new(),
        };
        for credential in self.sorted_credentials().await {
            let summary = credential.summary().await;
            stats.total += 1;
            if summary.disabled {
                stats.disabled += 1;
            } else if summary.error_count >= ERROR_THRESHOLD {
                stats.errored += 1;
            } else {
                stats.ready += 1;
            }
            stats.credentials.push(summary);
        }
        stats
    }

    /// Signal background loops to exit, close the watcher and wait for the loops.
    ///
    /// Network calls already in flight are not interrupted.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        self.watcher
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
            .collect();
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "pool worker ended abnormally");
            }
        }
        info!("credential pool stopped");
    }

    /// Credentials ordered by identity, cloned out from under the map lock.
    pub(crate) async fn sorted_credentials(&self) -> Vec<Arc<Credential>> {
        let registry = self.registry.read().await;
        let mut credentials: Vec<Arc<Credential>> = registry.credentials.values().cloned().collect();
        drop(registry);
        credentials.sort_by(|a, b| a.id().cmp(b.id()));
        credentials
    }

    /// Fetch a credential's access token without blocking the caller.
    pub(crate) fn spawn_refresh(&self, credential: Arc<Credential>) {
        let transport = self.transport.clone();
        tokio::spawn(async move {
            // Outcome is recorded on the credential and logged there
            let _ = credential.refresh(transport.as_ref()).await;
        });
    }

    pub(crate) fn track(&self, handle: JoinHandle<()>) {
        self.workers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(handle);
    }
}

/// Resolve a full identity or unique prefix to a registered identity.
fn resolve(registry: &Registry, id: &str) -> Result<String> {
    let id = id.trim_end_matches("...");
    if registry.credentials.contains_key(id) {
        return Ok(id.to_string());
    }
    if id.is_empty() {
        return Err(Error::NotFound(String::new()));
    }
    let mut matches = registry.credentials.keys().filter(|k| k.starts_with(id));
    match (matches.next(), matches.next()) {
        (Some(only), None) => Ok(only.clone()),
        _ => Err(Error::NotFound(common::mask(id))),
    }
}
