//! Environment, databases, and transaction helpers.

use std::path::Path;
use std::sync::{Mutex, OnceLock};

use byteorder::BigEndian;
use heed::types::{Bytes, DecodeIgnore, SerdeJson, U64};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use tracing::info;

use crate::error::{Error, Result};
use crate::keys::MAX_PART_LEN;
use crate::model::{Domain, Entity, EntityType, GrantRecord, PermissionType, User, UserGroup};

/// Edge databases store an epoch-millis stamp per key.
pub type EdgeDb = Database<Bytes, U64<BigEndian>>;

/// Record databases store one JSON-encoded record per key.
pub type RecordDb<T> = Database<Bytes, SerdeJson<T>>;

/// Tunables applied when the environment is opened.
#[derive(Debug, Clone)]
pub struct Options {
    /// LMDB map size in bytes.
    pub map_size: usize,
    /// Enroll group admins as members when they are appointed.
    pub auto_enroll_admins: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            map_size: 10 * 1024 * 1024 * 1024,
            auto_enroll_admins: true,
        }
    }
}

/// All database handles.
pub struct Dbs {
    pub domains: RecordDb<Domain>,
    pub users: RecordDb<User>,
    pub groups: RecordDb<UserGroup>,
    pub members: EdgeDb,
    pub members_rev: EdgeDb,
    pub entity_types: RecordDb<EntityType>,
    pub permission_types: RecordDb<PermissionType>,
    pub entities: RecordDb<Entity>,
    pub children: EdgeDb,
    pub grants: RecordDb<GrantRecord>,
}

// Global state
static ENV: OnceLock<Env> = OnceLock::new();
static DBS: OnceLock<Dbs> = OnceLock::new();
static OPTIONS: OnceLock<Options> = OnceLock::new();
static INIT_PATH: OnceLock<String> = OnceLock::new();
static TEST_LOCK: Mutex<()> = Mutex::new(());

/// Get the database handles, or error if not initialized
#[inline]
pub(crate) fn dbs() -> Result<&'static Dbs> {
    DBS.get().ok_or_else(|| Error::invalid("registry not initialized"))
}

/// Get the environment, or error if not initialized
#[inline]
pub(crate) fn env() -> Result<&'static Env> {
    ENV.get().ok_or_else(|| Error::invalid("registry not initialized"))
}

/// Options the environment was opened with, or defaults before init.
#[inline]
pub(crate) fn options() -> Options {
    OPTIONS.get().cloned().unwrap_or_default()
}

/// Execute a read-only operation in one snapshot transaction.
#[inline]
pub(crate) fn read<T, F: FnOnce(&Dbs, &RoTxn) -> Result<T>>(f: F) -> Result<T> {
    f(dbs()?, &env()?.read_txn()?)
}

/// Execute a mutating operation in one write transaction.
///
/// An error from the closure aborts the transaction; nothing is committed.
#[inline]
pub(crate) fn write<T, F: FnOnce(&Dbs, &mut RwTxn) -> Result<T>>(f: F) -> Result<T> {
    let d = dbs()?;
    let mut txn = env()?.write_txn()?;
    let r = f(d, &mut txn)?;
    txn.commit()?;
    Ok(r)
}

/// Initialize the registry at `path` with default [`Options`].
///
/// Idempotent for the same path; a second call with a different path fails.
pub fn init(path: &str) -> Result<()> {
    init_with(path, Options::default())
}

/// Initialize the registry at `path`.
pub fn init_with(path: &str, options: Options) -> Result<()> {
    if let Some(p) = INIT_PATH.get() {
        return if p == path {
            Ok(())
        } else {
            Err(Error::invalid(format!("already initialized at {p}")))
        };
    }
    std::fs::create_dir_all(path).map_err(heed::Error::Io)?;
    // SAFETY: LMDB requires that no other process opens this path concurrently.
    let env = unsafe {
        EnvOpenOptions::new()
            .map_size(options.map_size)
            .max_dbs(10)
            .open(Path::new(path))?
    };
    let mut txn = env.write_txn()?;
    let d = Dbs {
        domains: env.create_database(&mut txn, Some("domains"))?,
        users: env.create_database(&mut txn, Some("users"))?,
        groups: env.create_database(&mut txn, Some("groups"))?,
        members: env.create_database(&mut txn, Some("members"))?,
        members_rev: env.create_database(&mut txn, Some("members_rev"))?,
        entity_types: env.create_database(&mut txn, Some("entity_types"))?,
        permission_types: env.create_database(&mut txn, Some("permission_types"))?,
        entities: env.create_database(&mut txn, Some("entities"))?,
        children: env.create_database(&mut txn, Some("children"))?,
        grants: env.create_database(&mut txn, Some("grants"))?,
    };
    txn.commit()?;
    let _ = (
        ENV.set(env),
        DBS.set(d),
        OPTIONS.set(options),
        INIT_PATH.set(path.to_string()),
    );
    info!(path, "opened registry environment");
    Ok(())
}

/// Clear every database (test support).
pub fn clear_all() -> Result<()> {
    write(|d, txn| {
        d.domains.clear(txn)?;
        d.users.clear(txn)?;
        d.groups.clear(txn)?;
        d.members.clear(txn)?;
        d.members_rev.clear(txn)?;
        d.entity_types.clear(txn)?;
        d.permission_types.clear(txn)?;
        d.entities.clear(txn)?;
        d.children.clear(txn)?;
        d.grants.clear(txn)?;
        Ok(())
    })
}

/// Get the test lock (for single-threaded tests)
pub fn test_lock() -> std::sync::MutexGuard<'static, ()> {
    TEST_LOCK.lock().unwrap_or_else(|p| p.into_inner())
}

/// Milliseconds since the Unix epoch.
#[inline]
pub(crate) fn current_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Reject ids that cannot be stored as a key part.
#[inline]
pub(crate) fn check_id(kind: &'static str, id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_PART_LEN {
        return Err(Error::invalid(format!(
            "{kind} id must be 1 to {MAX_PART_LEN} bytes, got {}",
            id.len()
        )));
    }
    Ok(())
}

/// Delete every key under `prefix`. Returns the number of keys removed.
pub(crate) fn delete_prefixed<DC>(
    db: &Database<Bytes, DC>,
    txn: &mut RwTxn,
    prefix: &[u8],
) -> Result<usize> {
    let mut doomed = Vec::new();
    for item in db.remap_data_type::<DecodeIgnore>().prefix_iter(txn, prefix)? {
        let (k, ()) = item?;
        doomed.push(k.to_vec());
    }
    for k in &doomed {
        db.delete(txn, k)?;
    }
    Ok(doomed.len())
}
