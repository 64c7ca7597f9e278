//! Write-once checkpoint storage keyed by run tokens.

use crate::error::CalibError;
use crate::objective::LossWeights;
use facecalib_nn::AdamState;
use std::io::Write;
use std::path::{Path, PathBuf};

const FORMAT_VERSION: u32 = 1;
const EXTENSION: &str = "ckpt";

/// Estimator parameters and updater state of an optimizer.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct Checkpoint {
    /// Layout version of the artifact.
    pub format_version: u32,
    /// Token the checkpoint was saved under.
    pub token: String,
    /// Steps taken by the optimizer when saved.
    pub global_step: u64,
    /// Flat parameters of the intrinsic estimator.
    pub intrinsic_params: Vec<f64>,
    /// Flat parameters of the shape estimator.
    pub shape_params: Vec<f64>,
    /// Updater state of the intrinsic estimator.
    pub calib_state: AdamState,
    /// Updater state of the shape estimator.
    pub sfm_state: AdamState,
    /// Learning rate of the intrinsic updater.
    pub calib_lr: f64,
    /// Learning rate of the shape updater.
    pub sfm_lr: f64,
}

impl Checkpoint {
    pub(crate) fn current_version() -> u32 {
        FORMAT_VERSION
    }
}

/// Name of a checkpoint, encoding the configuration of the run that wrote it.
///
/// # Example
///
/// ```
/// use facecalib_optim::{CheckpointToken, LossWeights};
///
/// let weights = LossWeights { focal: 1.0, reprojection: 0.1 };
/// let token = CheckpointToken::for_run(3, "portrait", weights, 1e-3, 1e-4)?;
/// assert_eq!(
///     token.as_str(),
///     "03_orient=portrait_fw=1.00_sw=0.10_clr=0.001000_slr=0.000100_"
/// );
/// # Ok::<(), facecalib_optim::CalibError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointToken(String);

impl CheckpointToken {
    /// Wrap a raw token, rejecting anything that is not a plain file name.
    pub fn new(token: impl Into<String>) -> Result<Self, CalibError> {
        let token = token.into();
        let valid = !token.is_empty()
            && token != "."
            && token != ".."
            && !token.contains(['/', '\\', '\0']);
        if !valid {
            return Err(CalibError::InvalidConfig(format!(
                "'{token}' is not a valid checkpoint token"
            )));
        }
        Ok(Self(token))
    }

    /// Token of the checkpoint written after `epoch` of a training run.
    pub fn for_run(
        epoch: usize,
        orientation: &str,
        weights: LossWeights,
        calib_lr: f64,
        sfm_lr: f64,
    ) -> Result<Self, CalibError> {
        Self::new(format!(
            "{epoch:02}_orient={orientation}_fw={:.2}_sw={:.2}_clr={calib_lr:.6}_slr={sfm_lr:.6}_",
            weights.focal, weights.reprojection
        ))
    }

    /// The token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CheckpointToken {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Directory of checkpoints, one file per token.
///
/// Artifacts are immutable: saving under an existing token fails, and a
/// checkpoint only becomes visible once completely written.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    /// Open a store rooted at `root`. The directory is created on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the artifact for `token`.
    pub fn path(&self, token: &CheckpointToken) -> PathBuf {
        self.root.join(format!("{token}.{EXTENSION}"))
    }

    /// Whether an artifact exists for `token`.
    pub fn contains(&self, token: &CheckpointToken) -> bool {
        self.path(token).is_file()
    }

    /// Write `checkpoint` under `token`.
    pub fn save(&self, token: &CheckpointToken, checkpoint: &Checkpoint) -> Result<PathBuf, CalibError> {
        let path = self.path(token);
        let exists = || CalibError::CheckpointExists {
            token: token.to_string(),
            path: path.clone(),
        };
        if path.exists() {
            return Err(exists());
        }
        std::fs::create_dir_all(&self.root)?;

        let bytes = bincode::encode_to_vec(checkpoint, bincode::config::standard()).map_err(|e| {
            CalibError::CheckpointCorrupted {
                path: path.clone(),
                reason: e.to_string(),
            }
        })?;

        // per-writer temporary file, published only if no artifact exists yet
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{token}."))
            .suffix(".tmp")
            .tempfile_in(&self.root)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => {}
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => return Err(exists()),
            Err(e) => return Err(e.error.into()),
        }

        log::info!("saved checkpoint {}", path.display());
        Ok(path)
    }

    /// Read the checkpoint saved under `token`.
    pub fn load(&self, token: &CheckpointToken) -> Result<Checkpoint, CalibError> {
        let path = self.path(token);
        if !path.is_file() {
            return Err(CalibError::CheckpointNotFound {
                token: token.to_string(),
                path,
            });
        }
        let bytes = std::fs::read(&path)?;
        let corrupted = |reason: String| CalibError::CheckpointCorrupted {
            path: path.clone(),
            reason,
        };
        let (checkpoint, read): (Checkpoint, usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| corrupted(e.to_string()))?;
        if read != bytes.len() {
            return Err(corrupted(format!("{} trailing bytes", bytes.len() - read)));
        }
        if checkpoint.format_version != FORMAT_VERSION {
            return Err(corrupted(format!(
                "unsupported format version {}",
                checkpoint.format_version
            )));
        }
        Ok(checkpoint)
    }

    /// Tokens of every artifact in the store, sorted.
    pub fn tokens(&self) -> Result<Vec<CheckpointToken>, CalibError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut tokens = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    tokens.push(CheckpointToken::new(stem)?);
                }
            }
        }
        tokens.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(token: &str) -> Checkpoint {
        Checkpoint {
            format_version: FORMAT_VERSION,
            token: token.to_string(),
            global_step: 7,
            intrinsic_params: vec![0.5, -1.25],
            shape_params: vec![3.0],
            calib_state: AdamState {
                step: 7,
                m: vec![0.1, 0.2],
                v: vec![0.01, 0.02],
            },
            sfm_state: AdamState {
                step: 7,
                m: vec![0.3],
                v: vec![0.03],
            },
            calib_lr: 1e-3,
            sfm_lr: 1e-4,
        }
    }

    #[test]
    fn test_save_load_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = CheckpointStore::new(dir.path().join("ckpt"));
        let token = CheckpointToken::new("run_a")?;

        let path = store.save(&token, &checkpoint("run_a"))?;
        assert!(path.ends_with("run_a.ckpt"));
        assert_eq!(store.load(&token)?, checkpoint("run_a"));
        assert_eq!(store.tokens()?, vec![token]);
        Ok(())
    }

    #[test]
    fn test_checkpoints_are_write_once() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = CheckpointStore::new(dir.path());
        let token = CheckpointToken::new("run_b")?;
        store.save(&token, &checkpoint("run_b"))?;
        assert!(matches!(
            store.save(&token, &checkpoint("other")),
            Err(CalibError::CheckpointExists { .. })
        ));
        assert_eq!(store.load(&token)?.token, "run_b");
        Ok(())
    }

    #[test]
    fn test_stale_temporary_files_do_not_block_saves() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = CheckpointStore::new(dir.path());
        let token = CheckpointToken::new("00_run")?;
        std::fs::write(dir.path().join("00_run.ckpt.tmp"), b"partial")?;
        std::fs::write(dir.path().join(".00_run.a1b2c3.tmp"), b"partial")?;
        assert!(!store.contains(&token));

        store.save(&token, &checkpoint("00_run"))?;
        assert!(store.contains(&token));
        assert_eq!(store.load(&token)?, checkpoint("00_run"));
        assert_eq!(store.tokens()?, vec![token]);
        Ok(())
    }

    #[test]
    fn test_missing_and_corrupted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = CheckpointStore::new(dir.path());
        let token = CheckpointToken::new("missing")?;
        assert!(matches!(
            store.load(&token),
            Err(CalibError::CheckpointNotFound { .. })
        ));

        std::fs::write(store.path(&token), [0xff, 0x01])?;
        assert!(matches!(
            store.load(&token),
            Err(CalibError::CheckpointCorrupted { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_token_validation() {
        assert!(CheckpointToken::new("").is_err());
        assert!(CheckpointToken::new("../escape").is_err());
        assert!(CheckpointToken::new("..").is_err());
        assert!(CheckpointToken::new("00_orient=landscape_fw=0.10_").is_ok());
    }
}
