use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{Stage, Workspace};
use crate::common::{sha256_bytes, sha256_file};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHash {
    pub sha256: String,
}

/// A completed stage: what it was computed from and what it wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub fingerprint: String,
    pub completed: String,
    /// Artifacts relative to the workspace root.
    pub files: BTreeMap<String, FileHash>,
}

/// Why a stage cannot be served from its checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointState {
    Fresh,
    Missing,
    Stale(String),
}

/// `manifest.json`: completed stages of a workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    version: String,
    stages: BTreeMap<String, StageRecord>,
}

impl Manifest {
    const VERSION: &'static str = "1";

    /// Manifest of `ws`, or an empty one for a fresh workspace.
    pub fn load(ws: &Workspace) -> Result<Self> {
        if !ws.exists(Workspace::MANIFEST) {
            return Ok(Self { version: Self::VERSION.into(), stages: BTreeMap::new() });
        }
        let manifest: Manifest = serde_json::from_slice(&ws.read(Workspace::MANIFEST)?)
            .context("Failed to parse manifest.json")?;
        Ok(manifest)
    }

    pub fn save(&self, ws: &Workspace) -> Result<()> {
        ws.write(Workspace::MANIFEST, &serde_json::to_vec_pretty(self)?)
    }

    pub fn get(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.get(stage.to_str())
    }

    pub fn stages(&self) -> impl Iterator<Item = (&str, &StageRecord)> {
        self.stages.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Record `stage` as complete, hashing every artifact it wrote.
    pub fn record(&mut self, ws: &Workspace, stage: Stage, fingerprint: &str, files: &[&str]) -> Result<()> {
        let files = files.iter()
            .map(|rel| -> Result<(String, FileHash)> {
                let (rel, sha256) = sha256_file(rel, ws.root())?;
                Ok((rel, FileHash { sha256 }))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        self.stages.insert(stage.to_str().into(), StageRecord {
            fingerprint: fingerprint.into(),
            completed: chrono::Utc::now().to_rfc3339(),
            files,
        });
        Ok(())
    }

    pub fn invalidate(&mut self, stage: Stage) {
        self.stages.remove(stage.to_str());
    }

    /// Whether `stage` computed from `fingerprint` is on disk unchanged.
    pub fn check(&self, ws: &Workspace, stage: Stage, fingerprint: &str) -> CheckpointState {
        match self.get(stage) {
            None => CheckpointState::Missing,
            Some(record) if record.fingerprint != fingerprint => CheckpointState::Stale("inputs or parameters changed".into()),
            Some(_) => self.verify_artifacts(ws, stage),
        }
    }

    /// Whether the recorded artifacts of `stage` are on disk unchanged, regardless of inputs.
    pub fn verify_artifacts(&self, ws: &Workspace, stage: Stage) -> CheckpointState {
        let Some(record) = self.get(stage) else { return CheckpointState::Missing };
        for (rel, hash) in &record.files {
            match sha256_file(rel, ws.root()) {
                Ok((_, sha)) if sha == hash.sha256 => {}
                Ok(_) => return CheckpointState::Stale(format!("{rel} was modified")),
                Err(_) => return CheckpointState::Stale(format!("{rel} is missing")),
            }
        }
        CheckpointState::Fresh
    }
}

/// Hash of everything a stage result depends on.
pub struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    pub fn new(stage: Stage) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"stage\0");
        hasher.update(stage.to_str().as_bytes());
        Self { hasher }
    }

    fn field(mut self, tag: &str, key: &str, value: &[u8]) -> Self {
        for part in [tag.as_bytes(), key.as_bytes(), value] {
            self.hasher.update((part.len() as u64).to_le_bytes());
            self.hasher.update(part);
        }
        self
    }

    pub fn param<T: Serialize + ?Sized>(self, key: &str, value: &T) -> Result<Self> {
        let json = serde_json::to_vec(value).with_context(|| format!("Failed to encode parameter '{key}'"))?;
        Ok(self.field("param", key, &json))
    }

    /// Content hash of an input file (and of a shapefile's sidecars).
    pub fn input(self, key: &str, path: &Path) -> Result<Self> {
        let mut fp = self.field("input", key, input_hash(path)?.as_bytes());
        if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("shp")) {
            for ext in ["dbf", "prj"] {
                let sidecar = path.with_extension(ext);
                if sidecar.is_file() {
                    fp = fp.field("input", &format!("{key}.{ext}"), input_hash(&sidecar)?.as_bytes());
                }
            }
        }
        Ok(fp)
    }

    pub fn optional_input(self, key: &str, path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => self.input(key, path),
            None => Ok(self.field("input", key, b"")),
        }
    }

    pub fn upstream(self, stage: Stage, fingerprint: &str) -> Self {
        self.field("upstream", stage.to_str(), fingerprint.as_bytes())
    }

    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

fn input_hash(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read input {}", path.display()))?;
    Ok(sha256_bytes(&bytes))
}
