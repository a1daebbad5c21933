use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::WopiError;

/// Lock lifetime mandated by the WOPI protocol.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30 * 60);

/// Longest lock token the host accepts.
pub const MAX_LOCK_TOKEN_LEN: usize = 1024;

const MAX_LOCK_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Outcome of `unlock` on a document with no live lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockPolicy {
    /// Report a conflict with no current holder.
    #[default]
    Conflict,
    /// Treat the unlock as a no-op success.
    Succeed,
}

/// A live lock record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub token: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// In-process lock state for every document the host has seen.
///
/// Records live in a sharded map: each operation holds the shard guard for its
/// document for the whole read-modify-write, so operations on one document are
/// atomic with respect to each other while unrelated documents rarely contend.
/// No operation performs I/O.
///
/// Expired records are treated as absent the moment an operation observes
/// them. `purge_expired` only reclaims memory.
#[derive(Debug)]
pub struct LockManager {
    locks: DashMap<String, LockInfo>,
    ttl: chrono::Duration,
    unlock_policy: UnlockPolicy,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TTL)
    }
}

impl LockManager {
    /// Create a lock manager whose locks expire `ttl` after their last
    /// acquisition or refresh.
    pub fn new(ttl: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            ttl: chrono::Duration::from_std(ttl.min(MAX_LOCK_TTL))
                .unwrap_or_else(|_| chrono::Duration::zero()),
            unlock_policy: UnlockPolicy::default(),
        }
    }

    pub fn with_unlock_policy(mut self, policy: UnlockPolicy) -> Self {
        self.unlock_policy = policy;
        self
    }

    pub fn unlock_policy(&self) -> UnlockPolicy {
        self.unlock_policy
    }

    fn fresh(&self, token: &str, now: DateTime<Utc>) -> LockInfo {
        LockInfo {
            token: token.to_string(),
            acquired_at: now,
            expires_at: self.expiry_from(now),
        }
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Take the lock on `id` for `token`.
    ///
    /// Re-locking with the holder's own token succeeds and extends the expiry.
    #[instrument(skip(self), level = "debug")]
    pub fn lock(&self, id: &str, token: &str) -> Result<LockInfo, WopiError> {
        validate_token(token)?;
        let now = Utc::now();

        match self.locks.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                if existing.is_live(now) {
                    if existing.token != token {
                        debug!(
                            "Lock on {} held by {} until {} (requested by {})",
                            id, existing.token, existing.expires_at, token
                        );
                        return Err(WopiError::conflict(
                            "File already locked",
                            Some(existing.token.clone()),
                        ));
                    }
                    existing.expires_at = self.expiry_from(now);
                    debug!("Lock on {} already held by {} (reentrant)", id, token);
                    return Ok(existing.clone());
                }

                debug!(
                    "Lock on {} expired (was held by {}), acquiring for {}",
                    id, existing.token, token
                );
                let fresh = self.fresh(token, now);
                entry.insert(fresh.clone());
                Ok(fresh)
            }
            Entry::Vacant(entry) => {
                let fresh = self.fresh(token, now);
                debug!(
                    "Acquired lock on {} for {} (expires at {})",
                    id, token, fresh.expires_at
                );
                entry.insert(fresh.clone());
                Ok(fresh)
            }
        }
    }

    /// Release the lock on `id` held under `token`.
    #[instrument(skip(self), level = "debug")]
    pub fn unlock(&self, id: &str, token: &str) -> Result<(), WopiError> {
        validate_token(token)?;
        let now = Utc::now();

        match self.locks.entry(id.to_string()) {
            Entry::Occupied(entry) if entry.get().is_live(now) => {
                if entry.get().token != token {
                    debug!(
                        "Cannot release lock on {}: held by {} not {}",
                        id,
                        entry.get().token,
                        token
                    );
                    return Err(WopiError::conflict(
                        "Lock mismatch",
                        Some(entry.get().token.clone()),
                    ));
                }
                entry.remove();
                debug!("Released lock on {} by {}", id, token);
                Ok(())
            }
            Entry::Occupied(entry) => {
                entry.remove();
                self.unlock_without_lock(id)
            }
            Entry::Vacant(_) => self.unlock_without_lock(id),
        }
    }

    fn unlock_without_lock(&self, id: &str) -> Result<(), WopiError> {
        match self.unlock_policy {
            UnlockPolicy::Conflict => {
                debug!("Lock on {} not found for release", id);
                Err(WopiError::conflict("File not locked", None))
            }
            UnlockPolicy::Succeed => {
                debug!("Lock on {} not found for release (no-op)", id);
                Ok(())
            }
        }
    }

    /// Extend the expiry of the lock on `id` held under `token`.
    #[instrument(skip(self), level = "debug")]
    pub fn refresh(&self, id: &str, token: &str) -> Result<LockInfo, WopiError> {
        validate_token(token)?;
        let now = Utc::now();

        match self.locks.entry(id.to_string()) {
            Entry::Occupied(mut entry) if entry.get().is_live(now) => {
                let existing = entry.get_mut();
                if existing.token != token {
                    debug!(
                        "Cannot renew lock on {}: held by {} not {}",
                        id, existing.token, token
                    );
                    return Err(WopiError::conflict(
                        "Lock mismatch",
                        Some(existing.token.clone()),
                    ));
                }
                existing.expires_at = self.expiry_from(now);
                debug!(
                    "Renewed lock on {} for {} (new expiry: {})",
                    id, token, existing.expires_at
                );
                Ok(existing.clone())
            }
            Entry::Occupied(entry) => {
                entry.remove();
                Err(WopiError::conflict("File not locked", None))
            }
            Entry::Vacant(_) => Err(WopiError::conflict("File not locked", None)),
        }
    }

    /// Swap the lock on `id` from `old_token` to `new_token` in one step.
    #[instrument(skip(self), level = "debug")]
    pub fn unlock_and_relock(
        &self,
        id: &str,
        old_token: &str,
        new_token: &str,
    ) -> Result<LockInfo, WopiError> {
        validate_token(old_token)?;
        validate_token(new_token)?;
        let now = Utc::now();

        match self.locks.entry(id.to_string()) {
            Entry::Occupied(mut entry) if entry.get().is_live(now) => {
                if entry.get().token != old_token {
                    return Err(WopiError::conflict(
                        "Lock mismatch",
                        Some(entry.get().token.clone()),
                    ));
                }
                let fresh = self.fresh(new_token, now);
                entry.insert(fresh.clone());
                debug!("Relocked {} from {} to {}", id, old_token, new_token);
                Ok(fresh)
            }
            Entry::Occupied(entry) => {
                entry.remove();
                Err(WopiError::conflict("File not locked", None))
            }
            Entry::Vacant(_) => Err(WopiError::conflict("File not locked", None)),
        }
    }

    /// The live lock token on `id`, if any.
    pub fn get_lock(&self, id: &str) -> Option<String> {
        self.lock_info(id).map(|info| info.token)
    }

    /// The live lock record on `id`, if any.
    pub fn lock_info(&self, id: &str) -> Option<LockInfo> {
        let now = Utc::now();
        self.locks
            .get(id)
            .filter(|info| info.is_live(now))
            .map(|info| info.clone())
    }

    /// Drop expired records. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        self.locks.retain(|_, info| {
            let live = info.is_live(now);
            if !live {
                removed += 1;
            }
            live
        });
        if removed > 0 {
            debug!("Purged {} expired locks", removed);
        }
        removed
    }

    /// Number of records held, live or not yet purged.
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}

fn validate_token(token: &str) -> Result<(), WopiError> {
    if token.is_empty() {
        return Err(WopiError::BadRequest("Missing lock token".to_string()));
    }
    if token.len() > MAX_LOCK_TOKEN_LEN {
        return Err(WopiError::BadRequest(format!(
            "Lock token exceeds {} bytes",
            MAX_LOCK_TOKEN_LEN
        )));
    }
    Ok(())
}
