//! Artifact store: one JSON document per named slot under a root directory.
//!
//! Every document is wrapped in an envelope:
//!
//! ```text
//! { "version": 1, "slot": "clusters", "created_at": "...",
//!   "digest": "sha256:<hex>", "payload": { ... } }
//! ```
//!
//! The digest covers the canonical JSON bytes of the payload, so a later stage
//! can tell whether its upstream input changed since it last ran. Slots are
//! replaced wholesale; nothing is patched in place.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::cluster::ClusterTable;
use crate::embedding::EmbeddingSet;
use crate::error::{PipelineError, Result};
use crate::features::FeatureTable;
use crate::ledger::IdentityLedger;
use crate::merge::MergedTable;
use crate::projection::ProjectionArtifact;

pub const ENVELOPE_VERSION: u32 = 1;
pub const DIGEST_PREFIX: &str = "sha256:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Ids,
    Embeddings,
    Projection,
    Clusters,
    Features,
    Merged,
}

impl Slot {
    pub const ALL: [Slot; 6] = [
        Slot::Ids,
        Slot::Embeddings,
        Slot::Projection,
        Slot::Clusters,
        Slot::Features,
        Slot::Merged,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Slot::Ids => IdentityLedger::ARTIFACT,
            Slot::Embeddings => EmbeddingSet::ARTIFACT,
            Slot::Projection => ProjectionArtifact::ARTIFACT,
            Slot::Clusters => ClusterTable::ARTIFACT,
            Slot::Features => FeatureTable::ARTIFACT,
            Slot::Merged => MergedTable::ARTIFACT,
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.json", self.name())
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    slot: Slot,
    created_at: DateTime<Utc>,
    digest: String,
    payload: serde_json::Value,
}

/// Digest of a JSON value's canonical serialization.
pub fn payload_digest(value: &serde_json::Value) -> Result<String> {
    let bytes = serde_json::to_vec(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(DIGEST_PREFIX.len() + 64);
    out.push_str(DIGEST_PREFIX);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{b:02x}");
    }
    Ok(out)
}

/// Handle to an artifact directory. Stages receive this explicitly; nothing
/// resolves artifact paths from ambient state.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, slot: Slot) -> PathBuf {
        self.root.join(slot.file_name())
    }

    /// Slot file exists and is non-empty.
    pub fn exists(&self, slot: Slot) -> bool {
        fs::metadata(self.path(slot)).map_or(false, |m| m.is_file() && m.len() > 0)
    }

    /// Replace `slot` with `payload`; returns the payload digest.
    pub fn write<T: Serialize>(&self, slot: Slot, payload: &T) -> Result<String> {
        let payload = serde_json::to_value(payload)?;
        let digest = payload_digest(&payload)?;
        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            slot,
            created_at: Utc::now(),
            digest: digest.clone(),
            payload,
        };
        let path = self.path(slot);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&envelope)?)?;
        fs::rename(&tmp, &path)?;
        tracing::debug!(slot = %slot, path = %path.display(), digest = %digest, "artifact written");
        Ok(digest)
    }

    /// Read and verify `slot`.
    pub fn read<T: DeserializeOwned>(&self, slot: Slot) -> Result<T> {
        let envelope = self.read_envelope(slot)?;
        serde_json::from_value(envelope.payload).map_err(|e| PipelineError::Artifact {
            slot: slot.name().to_string(),
            message: format!("payload does not decode: {e}"),
        })
    }

    /// Read `slot` if it is present; `Ok(None)` when absent or empty.
    pub fn read_optional<T: DeserializeOwned>(&self, slot: Slot) -> Result<Option<T>> {
        if !self.exists(slot) {
            return Ok(None);
        }
        self.read(slot).map(Some)
    }

    /// Recorded digest of `slot`, verified against its payload.
    pub fn read_digest(&self, slot: Slot) -> Result<String> {
        Ok(self.read_envelope(slot)?.digest)
    }

    /// Delete `slot`; a missing slot is not an error.
    pub fn remove(&self, slot: Slot) -> Result<()> {
        match fs::remove_file(self.path(slot)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_envelope(&self, slot: Slot) -> Result<Envelope> {
        let path = self.path(slot);
        let bytes = fs::read(&path).map_err(|e| PipelineError::Artifact {
            slot: slot.name().to_string(),
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        let envelope: Envelope = serde_json::from_slice(&bytes).map_err(|e| PipelineError::Artifact {
            slot: slot.name().to_string(),
            message: format!("not a valid artifact envelope: {e}"),
        })?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(PipelineError::Artifact {
                slot: slot.name().to_string(),
                message: format!(
                    "envelope version {} is not supported (expected {ENVELOPE_VERSION})",
                    envelope.version
                ),
            });
        }
        if envelope.slot != slot {
            return Err(PipelineError::Artifact {
                slot: slot.name().to_string(),
                message: format!("file holds the `{}` slot", envelope.slot),
            });
        }
        let actual = payload_digest(&envelope.payload)?;
        if actual != envelope.digest {
            tracing::warn!(slot = %slot, recorded = %envelope.digest, actual = %actual, "artifact digest mismatch");
            return Err(PipelineError::Artifact {
                slot: slot.name().to_string(),
                message: format!("digest mismatch: recorded {}, computed {actual}", envelope.digest),
            });
        }
        Ok(envelope)
    }
}
