//! Redb-backed persistent account store.
//!
//! A single-file key-value database. Keys are `account.<name>` with the name
//! casefolded; values are serde_json-encoded [`AccountRecord`]s. Redb
//! serializes write transactions internally, so handler-initiated mutations
//! and any background flush cannot interleave.
//!
//! Store failures are warnings, not fatal errors: the in-memory state is the
//! source of truth for the lifetime of the process.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use rook_proto::casefold;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Redb table for account records: `account.<name>` -> serde_json.
const ACCOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("accounts");

/// Errors from the account store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stored credentials; only passphrase hashes today.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Credentials {
    pub passphrase: Option<String>,
}

/// One persisted account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Account name, casefolded.
    pub account: String,
    pub credentials: Credentials,
    /// Unix timestamp of REG CREATE.
    pub registered_ts: i64,
    /// Hostmask (or `*`) of the creating connection.
    pub registered_by: String,
    pub verified: bool,
    /// Pending verification code, cleared once verified.
    pub auth_code: Option<String>,
}

/// Handle to the account database, cheap to clone.
#[derive(Clone)]
pub struct AccountStore {
    db: Arc<Database>,
}

fn account_key(name: &str) -> String {
    format!("account.{}", casefold(name))
}

impl AccountStore {
    /// Open (or create) the store file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(redb::Error::from)?;
        // Make sure the table exists so first reads don't error.
        let txn = db.begin_write()?;
        txn.open_table(ACCOUNTS)?;
        txn.commit()?;
        Ok(AccountStore { db: Arc::new(db) })
    }

    /// Fetch an account record.
    pub fn get(&self, name: &str) -> Result<Option<AccountRecord>, StoreError> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ACCOUNTS)?;
        match table.get(account_key(name).as_str())? {
            Some(raw) => Ok(Some(serde_json::from_slice(raw.value())?)),
            None => Ok(None),
        }
    }

    /// Insert or replace an account record.
    pub fn put(&self, record: &AccountRecord) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(record)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ACCOUNTS)?;
            table.insert(account_key(&record.account).as_str(), encoded.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Delete an account record; missing keys are not an error.
    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ACCOUNTS)?;
            table.remove(account_key(name).as_str())?;
        }
        txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_store() -> (tempfile::TempDir, AccountStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AccountStore::open(&dir.path().join("accounts.db")).unwrap();
        (dir, store)
    }

    fn record(name: &str, verified: bool) -> AccountRecord {
        AccountRecord {
            account: name.into(),
            credentials: Credentials {
                passphrase: Some("$argon2id$stub".into()),
            },
            registered_ts: 1_700_000_000,
            registered_by: "alice!a@host".into(),
            verified,
            auth_code: if verified { None } else { Some("abcDEF123456789".into()) },
        }
    }

    #[test]
    fn put_get_roundtrip() {
        let (_dir, store) = scratch_store();
        store.put(&record("alice", true)).unwrap();

        let loaded = store.get("alice").unwrap().expect("record present");
        assert_eq!(loaded.account, "alice");
        assert!(loaded.verified);
        assert_eq!(loaded.credentials.passphrase.as_deref(), Some("$argon2id$stub"));
    }

    #[test]
    fn lookup_is_casefolded() {
        let (_dir, store) = scratch_store();
        store.put(&record("alice", true)).unwrap();
        assert!(store.get("ALICE").unwrap().is_some());
    }

    #[test]
    fn missing_account_is_none() {
        let (_dir, store) = scratch_store();
        assert!(store.get("nobody").unwrap().is_none());
    }

    #[test]
    fn delete_removes_record() {
        let (_dir, store) = scratch_store();
        store.put(&record("bob", false)).unwrap();
        store.delete("Bob").unwrap();
        assert!(store.get("bob").unwrap().is_none());
        // deleting again is fine
        store.delete("bob").unwrap();
    }
}
