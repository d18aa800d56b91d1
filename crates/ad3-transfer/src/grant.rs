//! Single-use download grants.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use ad3_core::Key;
use tokio::time::Instant;
use tracing::debug;

/// Why a grant lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantRejection {
    Unknown,
    Expired,
    PathMismatch,
}

impl fmt::Display for GrantRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GrantRejection::Unknown => "no grant for key",
            GrantRejection::Expired => "grant expired",
            GrantRejection::PathMismatch => "path does not match grant",
        })
    }
}

struct Grant {
    path: PathBuf,
    expires_at: Instant,
}

/// Outstanding grants keyed by file key.
///
/// A grant authorizes exactly one download of exactly one path. The first
/// request presenting the key consumes it, whether or not it succeeds.
pub struct GrantTable {
    ttl: Duration,
    grants: Mutex<HashMap<Key, Grant>>,
}

impl GrantTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            grants: Mutex::new(HashMap::new()),
        }
    }

    /// Authorize one download of `path` under `key`, replacing any earlier
    /// grant for the same key.
    pub fn grant(&self, key: Key, path: impl Into<PathBuf>) {
        let now = Instant::now();
        let path = path.into();
        let mut grants = self.grants.lock().unwrap_or_else(|e| e.into_inner());
        grants.retain(|_, g| g.expires_at > now);
        debug!(key = %key.short(), ?path, "grant issued");
        grants.insert(
            key,
            Grant {
                path,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn revoke(&self, key: &Key) -> bool {
        let mut grants = self.grants.lock().unwrap_or_else(|e| e.into_inner());
        let existed = grants.remove(key).is_some();
        if existed {
            debug!(key = %key.short(), "grant revoked");
        }
        existed
    }

    /// Consume the grant for `key` if it names `path` and is still live.
    pub fn take(&self, key: &Key, path: &Path) -> Result<PathBuf, GrantRejection> {
        let grant = {
            let mut grants = self.grants.lock().unwrap_or_else(|e| e.into_inner());
            grants.remove(key).ok_or(GrantRejection::Unknown)?
        };
        if Instant::now() >= grant.expires_at {
            return Err(GrantRejection::Expired);
        }
        if grant.path != path {
            return Err(GrantRejection::PathMismatch);
        }
        Ok(grant.path)
    }

    pub fn len(&self) -> usize {
        self.grants.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Key {
        Key::derive("audio_file", &[b"a.wav", b""])
    }

    #[test]
    fn grant_is_single_use() {
        let table = GrantTable::new(Duration::from_secs(60));
        table.grant(key(), "/music/a.wav");
        assert!(table.take(&key(), Path::new("/music/a.wav")).is_ok());
        assert_eq!(
            table.take(&key(), Path::new("/music/a.wav")),
            Err(GrantRejection::Unknown)
        );
    }

    #[test]
    fn wrong_path_consumes_grant() {
        let table = GrantTable::new(Duration::from_secs(60));
        table.grant(key(), "/music/a.wav");
        assert_eq!(
            table.take(&key(), Path::new("/etc/passwd")),
            Err(GrantRejection::PathMismatch)
        );
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn grant_expires() {
        let table = GrantTable::new(Duration::from_secs(5));
        table.grant(key(), "/music/a.wav");
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(
            table.take(&key(), Path::new("/music/a.wav")),
            Err(GrantRejection::Expired)
        );
    }

    #[test]
    fn revoke_removes() {
        let table = GrantTable::new(Duration::from_secs(60));
        table.grant(key(), "/music/a.wav");
        assert!(table.revoke(&key()));
        assert!(!table.revoke(&key()));
    }
}
