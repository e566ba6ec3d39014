//! The `lake.json` marker identifying a lake and its layout version.

use lake_storage::{StorageEngine, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{LakeError, Result};

pub const MARKER_KEY: &str = "lake.json";
pub const MAGIC: &str = "lakehouse";
pub const VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMarker {
    pub magic: String,
    pub version: u32,
}

impl VersionMarker {
    pub fn current() -> Self {
        Self {
            magic: MAGIC.to_string(),
            version: VERSION,
        }
    }
}

/// Write the marker of a new lake. Fails with [`LakeError::LakeExists`] if
/// one is already there.
pub fn write_marker(engine: &dyn StorageEngine) -> Result<()> {
    let data = serde_json::to_vec(&VersionMarker::current())
        .map_err(|e| LakeError::Internal(e.to_string()))?;
    match engine.put_if_not_exists(MARKER_KEY, &data) {
        Ok(()) => {}
        Err(StoreError::AlreadyExists(_)) => return Err(LakeError::LakeExists),
        Err(StoreError::Unsupported(_)) => {
            if engine.exists(MARKER_KEY)? {
                return Err(LakeError::LakeExists);
            }
            engine.put(MARKER_KEY, &data)?;
        }
        Err(e) => return Err(e.into()),
    }
    info!(version = VERSION, "created lake");
    Ok(())
}

/// Check that the engine holds a lake this code can read.
pub fn check_marker(engine: &dyn StorageEngine) -> Result<VersionMarker> {
    let bytes = engine.get(MARKER_KEY)?.ok_or(LakeError::NotALake)?;
    let marker: VersionMarker = serde_json::from_slice(&bytes)
        .map_err(|e| LakeError::BadMagic(format!("unreadable marker: {e}")))?;
    if marker.magic != MAGIC {
        return Err(LakeError::BadMagic(marker.magic));
    }
    if marker.version != VERSION {
        return Err(LakeError::VersionMismatch {
            found: marker.version,
            expected: VERSION,
        });
    }
    debug!(version = marker.version, "lake marker ok");
    Ok(marker)
}
