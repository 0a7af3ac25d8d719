//! # Reference Resolver
//!
//! Turns a user-granted location into a persisted [`Handle`] and a handle
//! into a temporary [`Grant`].
//!
//! Handles are stored as opaque blobs under the hash of the normalized
//! location. Staleness is corrected lazily: when the host reports a stale
//! or undecodable blob, the resolver re-derives a fresh blob from the
//! recorded location, persists it and still returns a grant for the current
//! call. Only a failed re-derivation surfaces, as [`AccessError::Revoked`].

use crate::error::{AccessError, Result};
use crate::grant::{Grant, Handle};
use bridge_traits::{BookmarkProvider, BridgeError, Clock};
use core_library::models::{location_key, normalize_location, StoredHandle};
use core_library::repositories::HandleRepository;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct ReferenceResolver {
    provider: Arc<dyn BookmarkProvider>,
    handles: Arc<dyn HandleRepository>,
    clock: Arc<dyn Clock>,
    live: Arc<AtomicUsize>,
}

impl ReferenceResolver {
    pub fn new(
        provider: Arc<dyn BookmarkProvider>,
        handles: Arc<dyn HandleRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            handles,
            clock,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create and persist a handle for a location the user granted
    ///
    /// # Errors
    /// [`AccessError::Denied`] if the host refuses access.
    #[instrument(skip(self), fields(location = %location.display()))]
    pub async fn acquire(&self, location: &Path) -> Result<Handle> {
        let location = normalize_location(location);
        let blob = self
            .provider
            .create_bookmark(&location)
            .await
            .map_err(|e| match e {
                BridgeError::PermissionDenied { path, reason } => AccessError::Denied {
                    location: path,
                    reason,
                },
                other => AccessError::Bridge(other),
            })?;

        let handle = self.persist(&location, blob).await?;
        info!(key = %handle.key, "Access handle acquired");
        Ok(handle)
    }

    /// Stored handle for a location, if one was acquired before
    pub async fn lookup(&self, location: &Path) -> Result<Option<Handle>> {
        self.lookup_key(&location_key(location)).await
    }

    pub async fn lookup_key(&self, key: &str) -> Result<Option<Handle>> {
        let stored = self.handles.get(key).await?;
        Ok(stored.map(|s| Handle {
            key: s.key,
            location: PathBuf::from(s.location),
            blob: s.blob,
        }))
    }

    /// Stored handle for `key`, failing when none exists
    pub async fn require_key(&self, key: &str) -> Result<Handle> {
        self.lookup_key(key)
            .await?
            .ok_or_else(|| AccessError::UnknownHandle(key.to_string()))
    }

    /// Open a temporary grant for a handle
    ///
    /// # Errors
    /// [`AccessError::Revoked`] if the blob is stale or unreadable and a
    /// fresh one cannot be derived, or if the host refuses to start access.
    /// [`AccessError::Bridge`] when re-deriving fails for another reason,
    /// such as the location no longer existing.
    #[instrument(skip(self, handle), fields(key = %handle.key))]
    pub async fn resolve(&self, handle: &Handle) -> Result<Grant> {
        let path = match self.provider.resolve_bookmark(&handle.blob).await {
            Ok(resolved) if !resolved.is_stale => resolved.path,
            Ok(_) => {
                debug!("Handle is stale, re-deriving");
                self.rederive(handle).await?.location
            }
            Err(e) => {
                warn!(error = %e, "Handle failed to resolve, re-deriving");
                self.rederive(handle).await?.location
            }
        };

        if !self.provider.start_access(&path) {
            return Err(AccessError::Revoked {
                location: path,
                reason: "host refused to start access".to_string(),
            });
        }

        Ok(Grant::open(path, self.provider.clone(), self.live.clone()))
    }

    /// Grant for a location, acquiring a handle first if none is stored
    pub async fn resolve_location(&self, location: &Path) -> Result<Grant> {
        let handle = match self.lookup(location).await? {
            Some(handle) => handle,
            None => self.acquire(location).await?,
        };
        self.resolve(&handle).await
    }

    /// Run `f` with the handle's granted path; the grant is released on
    /// every exit path, including when `f` fails or the future is dropped.
    pub async fn with_grant<T, E, F, Fut>(&self, handle: &Handle, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<AccessError>,
    {
        let grant = self.resolve(handle).await?;
        let outcome = f(grant.path().to_path_buf()).await;
        grant.release();
        outcome
    }

    /// Persist a blob renewed elsewhere (e.g. by playback) for `location`
    pub async fn renew(&self, location: &Path, blob: Vec<u8>) -> Result<Handle> {
        let handle = self.persist(location, blob).await?;
        debug!(key = %handle.key, "Access handle renewed");
        Ok(handle)
    }

    /// Drop the stored handle for a location
    pub async fn forget(&self, location: &Path) -> Result<bool> {
        Ok(self.handles.delete(&location_key(location)).await?)
    }

    /// Grants currently open
    pub fn live_grants(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    async fn rederive(&self, handle: &Handle) -> Result<Handle> {
        let blob = self
            .provider
            .create_bookmark(&handle.location)
            .await
            .map_err(|e| {
                warn!(key = %handle.key, error = %e, "Re-deriving handle failed");
                match e {
                    BridgeError::PermissionDenied { .. } | BridgeError::InvalidBookmark(_) => {
                        AccessError::Revoked {
                            location: handle.location.clone(),
                            reason: e.to_string(),
                        }
                    }
                    other => AccessError::Bridge(other),
                }
            })?;

        let renewed = self.persist(&handle.location, blob).await?;
        info!(key = %renewed.key, "Stale handle replaced");
        Ok(renewed)
    }

    async fn persist(&self, location: &Path, blob: Vec<u8>) -> Result<Handle> {
        let stored = StoredHandle::new(location, blob, self.clock.unix_timestamp());
        self.handles.put(&stored).await?;
        Ok(Handle {
            key: stored.key,
            location: PathBuf::from(stored.location),
            blob: stored.blob,
        })
    }
}
