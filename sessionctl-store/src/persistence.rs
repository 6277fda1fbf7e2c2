use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sessionctl_core::{
    IdempotencyEntry, Lease, LeaseKey, PipelineId, PipelineRecord, SessionId, SessionRecord,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoreError;

/// On-disk shape of the whole store: one JSON document per keyspace, under
/// the configured data directory. The file format is an implementation
/// choice (§4.1 only requires the atomic/snapshot-scan contracts); JSON
/// snapshots keep the on-disk layout legible for operators without pulling
/// in a database engine the rest of the control plane doesn't need.
///
/// `idempotency` is a flat list rather than a map: its natural key is a
/// `(subject, key)` tuple, and JSON object keys must be strings, so the
/// in-memory tuple-keyed map is flattened here and rebuilt by the caller.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub sessions: HashMap<SessionId, SessionRecord>,
    pub pipelines: HashMap<PipelineId, PipelineRecord>,
    pub idempotency: Vec<IdempotencyEntry>,
    pub leases: HashMap<LeaseKey, Lease>,
}

fn path_for(dir: &Path, keyspace: &str) -> PathBuf {
    dir.join(format!("{keyspace}.json"))
}

/// Load every keyspace file present under `dir`. A file that is absent
/// yields an empty map for that keyspace (first boot); a file that exists
/// but fails to parse is a fail-closed startup error.
pub(crate) fn load(dir: &Path) -> Result<Snapshot, StoreError> {
    let sessions = load_keyspace(dir, "sessions")?.unwrap_or_default();
    let pipelines = load_keyspace(dir, "pipelines")?.unwrap_or_default();
    let idempotency = load_keyspace(dir, "idempotency")?.unwrap_or_default();
    let leases = load_keyspace(dir, "leases")?.unwrap_or_default();
    Ok(Snapshot {
        sessions,
        pipelines,
        idempotency,
        leases,
    })
}

fn load_keyspace<T: for<'de> Deserialize<'de>>(
    dir: &Path,
    keyspace: &str,
) -> Result<Option<T>, StoreError> {
    let path = path_for(dir, keyspace);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(&path)
        .map_err(|e| StoreError::Unavailable(format!("reading {}: {e}", path.display())))?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(keyspace, error = %e, "persisted keyspace failed integrity check");
            Err(StoreError::Corrupt(format!(
                "{keyspace} snapshot at {} is malformed: {e}",
                path.display()
            )))
        }
    }
}

pub(crate) fn save(dir: &Path, snapshot: &Snapshot) -> Result<(), StoreError> {
    save_keyspace(dir, "sessions", &snapshot.sessions)?;
    save_keyspace(dir, "pipelines", &snapshot.pipelines)?;
    save_keyspace(dir, "idempotency", &snapshot.idempotency)?;
    save_keyspace(dir, "leases", &snapshot.leases)?;
    Ok(())
}

fn save_keyspace<T: Serialize>(dir: &Path, keyspace: &str, value: &T) -> Result<(), StoreError> {
    let path = path_for(dir, keyspace);
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| StoreError::Unavailable(format!("serializing {keyspace}: {e}")))?;
    std::fs::write(&tmp, bytes)
        .map_err(|e| StoreError::Unavailable(format!("writing {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, &path)
        .map_err(|e| StoreError::Unavailable(format!("renaming {}: {e}", tmp.display())))?;
    Ok(())
}
