// ============================================================
// Layer 6 — Model Repository
// ============================================================
// Owns the on-disk layout of a model directory:
//
//   <repository>/
//     checkpoint-<N>-trace.bin   ← traced graph, written verbatim
//     checkpoint-<N>.bin         ← head weights (BinFileRecorder)
//     config.json                ← effective configuration
//     corresp.txt                ← "<index> <label>" per line
//     metrics.csv                ← per-iteration measures
//
// Clearing the repository only removes the .json side files;
// checkpoints are never deleted from here.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Extension shared by traced graphs and head weights
pub const MODEL_EXT: &str = "bin";
const CONFIG_FILE: &str = "config.json";
const CLEARED_EXTENSIONS: [&str; 1] = ["json"];

/// Files a module is loaded from. Either, both or neither may be set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelDescriptor {
    pub traced:  Option<PathBuf>,
    pub weights: Option<PathBuf>,
}

pub struct ModelRepository {
    dir: PathBuf,
}

impl ModelRepository {
    /// Open a repository, creating the directory when missing.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create model repository '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn trace_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("checkpoint-{name}-trace.{MODEL_EXT}"))
    }

    /// Head weights path without extension; the recorder appends it.
    pub fn weights_stem(&self, name: &str) -> PathBuf {
        self.dir.join(format!("checkpoint-{name}"))
    }

    #[cfg(test)]
    pub fn weights_path(&self, name: &str) -> PathBuf {
        self.weights_stem(name).with_extension(MODEL_EXT)
    }

    /// Pick the highest-iteration traced graph and head weights.
    pub fn scan(&self) -> Result<ModelDescriptor> {
        let mut best_trace:   Option<(u64, PathBuf)> = None;
        let mut best_weights: Option<(u64, PathBuf)> = None;

        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Cannot list model repository '{}'", self.dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            let Some(stem) = name
                .strip_prefix("checkpoint-")
                .and_then(|s| s.strip_suffix(&format!(".{MODEL_EXT}")))
            else {
                continue;
            };

            let (slot, number) = match stem.strip_suffix("-trace") {
                Some(n) => (&mut best_trace, n),
                None    => (&mut best_weights, stem),
            };
            if let Ok(n) = number.parse::<u64>() {
                if slot.as_ref().map_or(true, |(best, _)| n > *best) {
                    *slot = Some((n, path.clone()));
                }
            }
        }

        Ok(ModelDescriptor {
            traced:  best_trace.map(|(_, p)| p),
            weights: best_weights.map(|(_, p)| p),
        })
    }

    /// Explicit files win over whatever the scan finds.
    pub fn descriptor(&self, traced: Option<&str>, weights: Option<&str>) -> Result<ModelDescriptor> {
        let scanned = self.scan()?;
        Ok(ModelDescriptor {
            traced:  traced.map(PathBuf::from).or(scanned.traced),
            weights: weights.map(PathBuf::from).or(scanned.weights),
        })
    }

    pub fn save_config<T: Serialize>(&self, cfg: &T) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved configuration to '{}'", path.display());
        Ok(())
    }

    pub fn load_config<T: DeserializeOwned>(&self) -> Result<T> {
        let path = self.dir.join(CONFIG_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read config from '{}'", path.display()))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Remove side-artifact metadata files, keeping checkpoints.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_meta = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| CLEARED_EXTENSIONS.contains(&e));
            if path.is_file() && is_meta {
                fs::remove_file(&path)
                    .with_context(|| format!("Cannot remove '{}'", path.display()))?;
                removed += 1;
            }
        }
        tracing::info!("Cleared {} metadata files from '{}'", removed, self.dir.display());
        Ok(removed)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn test_scan_picks_latest() {
        let dir  = tempfile::tempdir().unwrap();
        let repo = ModelRepository::new(dir.path()).unwrap();
        for name in ["checkpoint-2-trace.bin", "checkpoint-10-trace.bin", "checkpoint-2.bin",
                     "checkpoint-9.bin", "checkpoint-x.bin", "notes.txt"] {
            touch(dir.path(), name);
        }

        let desc = repo.scan().unwrap();
        assert_eq!(desc.traced,  Some(repo.trace_path("10")));
        assert_eq!(desc.weights, Some(repo.weights_path("9")));
    }

    #[test]
    fn test_explicit_files_override_scan() {
        let dir  = tempfile::tempdir().unwrap();
        let repo = ModelRepository::new(dir.path()).unwrap();
        touch(dir.path(), "checkpoint-1.bin");

        let desc = repo.descriptor(Some("/tmp/base-trace.bin"), None).unwrap();
        assert_eq!(desc.traced,  Some(PathBuf::from("/tmp/base-trace.bin")));
        assert_eq!(desc.weights, Some(repo.weights_path("1")));
    }

    #[test]
    fn test_clear_keeps_checkpoints() {
        let dir  = tempfile::tempdir().unwrap();
        let repo = ModelRepository::new(dir.path()).unwrap();
        repo.save_config(&vec![1, 2, 3]).unwrap();
        touch(dir.path(), "checkpoint-3-trace.bin");
        touch(dir.path(), "checkpoint-3.bin");
        touch(dir.path(), "measures.json");

        assert_eq!(repo.clear().unwrap(), 2);
        assert!(dir.path().join("checkpoint-3-trace.bin").exists());
        assert!(dir.path().join("checkpoint-3.bin").exists());
        assert!(!dir.path().join("config.json").exists());
    }
}
