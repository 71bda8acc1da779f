//! Settled-authorization registry used by the local facilitator.
//!
//! Keys are `keccak256(from ‖ nonce ‖ asset)`, so the same nonce counter on
//! two assets (or from two payers) never collides. Contract assets hash by
//! address bytes, any other asset reference by its lowercased text.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use alloy::primitives::{keccak256, Address, B256};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{ErrorCode, X402Error};

/// Registry key for one authorization.
pub fn authorization_key(from: Address, asset: &str, nonce: B256) -> B256 {
    let mut buf = Vec::with_capacity(53 + asset.len());
    buf.extend_from_slice(from.as_slice());
    buf.extend_from_slice(nonce.as_slice());
    match asset.parse::<Address>() {
        Ok(contract) => {
            buf.push(0);
            buf.extend_from_slice(contract.as_slice());
        }
        Err(_) => {
            buf.push(1);
            buf.extend_from_slice(asset.trim().to_ascii_lowercase().as_bytes());
        }
    }
    keccak256(buf)
}

/// Storage backend for consumed authorization keys. Thread-safe.
pub trait NonceStore: Send + Sync {
    /// Whether `key` has already been consumed. Store failures report `true`.
    fn is_used(&self, key: &B256) -> bool;

    /// Atomically claim `key`. `Ok(false)` means it was already consumed.
    fn try_use(&self, key: B256) -> Result<bool, X402Error>;

    /// Give a claimed key back, e.g. when settlement failed after the claim.
    fn release(&self, key: &B256);

    /// Drop entries older than `max_age`. Returns how many were removed.
    fn purge_expired(&self, max_age: Duration) -> usize;
}

/// In-process store. Lost on restart.
#[derive(Default)]
pub struct InMemoryNonceStore {
    used: DashMap<B256, Instant>,
}

impl InMemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NonceStore for InMemoryNonceStore {
    fn is_used(&self, key: &B256) -> bool {
        self.used.contains_key(key)
    }

    fn try_use(&self, key: B256) -> Result<bool, X402Error> {
        match self.used.entry(key) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(v) => {
                v.insert(Instant::now());
                Ok(true)
            }
        }
    }

    fn release(&self, key: &B256) {
        self.used.remove(key);
    }

    fn purge_expired(&self, max_age: Duration) -> usize {
        let before = self.used.len();
        self.used.retain(|_, at| at.elapsed() < max_age);
        before - self.used.len()
    }
}

/// SQLite-backed store. Survives restarts.
pub struct SqliteNonceStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteNonceStore {
    /// Open or create the database at `path`; on Unix the file is made 0600.
    pub fn open(path: &str) -> Result<Self, X402Error> {
        let conn = rusqlite::Connection::open(path).map_err(store_error)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS settled_authorizations (
                auth_key BLOB PRIMARY KEY,
                settled_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_settled_at ON settled_authorizations(settled_at);
            PRAGMA journal_mode=WAL;",
        )
        .map_err(store_error)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(path = %path, error = %e, "failed to restrict nonce database permissions");
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::error!("nonce store mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

fn store_error(e: rusqlite::Error) -> X402Error {
    X402Error::Payment(ErrorCode::SettlementFailed, format!("nonce store: {e}"))
}

// Clock errors read as "far future" so nothing is purged early.
fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(i64::MAX)
}

impl NonceStore for SqliteNonceStore {
    fn is_used(&self, key: &B256) -> bool {
        self.conn()
            .query_row(
                "SELECT COUNT(*) FROM settled_authorizations WHERE auth_key = ?1",
                [key.as_slice()],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)
            .unwrap_or(true)
    }

    fn try_use(&self, key: B256) -> Result<bool, X402Error> {
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO settled_authorizations (auth_key, settled_at) VALUES (?1, ?2)",
                rusqlite::params![key.as_slice(), unix_now()],
            )
            .map_err(store_error)?;
        Ok(inserted == 1)
    }

    fn release(&self, key: &B256) {
        if let Err(e) = self.conn().execute(
            "DELETE FROM settled_authorizations WHERE auth_key = ?1",
            [key.as_slice()],
        ) {
            tracing::error!(error = %e, "failed to release authorization key; it stays consumed");
        }
    }

    fn purge_expired(&self, max_age: Duration) -> usize {
        let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        let cutoff = unix_now().saturating_sub(max_age);
        self.conn()
            .execute(
                "DELETE FROM settled_authorizations WHERE settled_at < ?1",
                [cutoff],
            )
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASSET: &str = "0x0202020202020202020202020202020202020202";

    fn key(byte: u8) -> B256 {
        authorization_key(Address::repeat_byte(1), ASSET, B256::repeat_byte(byte))
    }

    #[test]
    fn test_key_depends_on_asset() {
        let nonce = B256::repeat_byte(7);
        let a = authorization_key(Address::repeat_byte(1), ASSET, nonce);
        let b = authorization_key(
            Address::repeat_byte(1),
            "0x0303030303030303030303030303030303030303",
            nonce,
        );
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_normalizes_asset_reference() {
        let from = Address::repeat_byte(1);
        let nonce = B256::repeat_byte(7);
        assert_eq!(
            authorization_key(from, crate::BASE_SEPOLIA_USDC, nonce),
            authorization_key(from, &crate::BASE_SEPOLIA_USDC.to_lowercase(), nonce)
        );
        assert_eq!(
            authorization_key(from, "USD-stable", nonce),
            authorization_key(from, "usd-stable", nonce)
        );
        assert_ne!(
            authorization_key(from, "USD-stable", nonce),
            authorization_key(from, "EUR-stable", nonce)
        );
    }

    #[test]
    fn test_in_memory_claim_once() {
        let store = InMemoryNonceStore::new();
        assert!(store.try_use(key(1)).unwrap());
        assert!(!store.try_use(key(1)).unwrap());
        assert!(store.is_used(&key(1)));
        assert!(!store.is_used(&key(2)));

        store.release(&key(1));
        assert!(store.try_use(key(1)).unwrap());
    }

    #[test]
    fn test_in_memory_purge() {
        let store = InMemoryNonceStore::new();
        store.try_use(key(1)).unwrap();
        assert_eq!(store.purge_expired(Duration::ZERO), 1);
        assert!(!store.is_used(&key(1)));
    }

    #[test]
    fn test_sqlite_claim_once_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonces.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteNonceStore::open(path).unwrap();
            assert!(store.try_use(key(9)).unwrap());
            assert!(!store.try_use(key(9)).unwrap());
        }

        let reopened = SqliteNonceStore::open(path).unwrap();
        assert!(reopened.is_used(&key(9)));
        assert!(!reopened.try_use(key(9)).unwrap());
    }

    #[test]
    fn test_sqlite_purge_old_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteNonceStore::open(dir.path().join("n.db").to_str().unwrap()).unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO settled_authorizations (auth_key, settled_at) VALUES (?1, ?2)",
                rusqlite::params![key(3).as_slice(), 1000i64],
            )
            .unwrap();
        store.try_use(key(4)).unwrap();

        assert_eq!(store.purge_expired(Duration::from_secs(60)), 1);
        assert!(!store.is_used(&key(3)));
        assert!(store.is_used(&key(4)));
    }
}
