//! Run metadata and reproducibility tracking.

use crate::error::Result;
use crate::export::write_json;
use crate::panel::Panel;
use chrono::{DateTime, Utc};
use git2::Repository;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

/// Git repository state at the time of execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitInfo {
    /// Current commit SHA (full 40-character hash).
    pub commit_sha: String,
    /// Current branch name.
    pub branch: Option<String>,
    /// Whether there are uncommitted changes in the working tree.
    pub dirty: bool,
}

/// Metadata about an input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFileMetadata {
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// SHA256 checksum of the file contents.
    pub checksum: String,
}

impl GitInfo {
    /// Capture the current git state.
    ///
    /// Returns None if not in a git repository or git operations fail.
    pub fn capture() -> Option<Self> {
        let repo = match Repository::discover(".") {
            Ok(r) => r,
            Err(e) => {
                debug!("Not in a git repository: {}", e);
                return None;
            }
        };

        let head = repo.head().ok()?;
        let commit = head.peel_to_commit().ok()?;
        let commit_sha = commit.id().to_string();

        let branch = if head.is_branch() {
            head.shorthand().map(|s| s.to_string())
        } else {
            None
        };

        let mut status_opts = git2::StatusOptions::new();
        status_opts.include_untracked(true);
        let statuses = repo.statuses(Some(&mut status_opts)).ok()?;
        let dirty = !statuses.is_empty();

        if dirty {
            warn!("Running backtest with uncommitted changes in working tree");
        }

        Some(GitInfo {
            commit_sha,
            branch,
            dirty,
        })
    }
}

/// Sidecar written next to batch results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// SHA256 of the run configuration's JSON form.
    pub config_hash: String,
    /// SHA256 over the panel's tickers, dates, closes and returns.
    pub panel_fingerprint: String,
    pub num_tickers: usize,
    pub num_dates: usize,
    /// Runs that produced a result.
    pub num_runs: usize,
    #[serde(default)]
    pub inputs: Vec<DataFileMetadata>,
    #[serde(default)]
    pub git: Option<GitInfo>,
}

impl RunMetadata {
    /// Describe a run of `config` over `panel`.
    pub fn new<T: Serialize>(config: &T, panel: &Panel, num_runs: usize) -> Self {
        Self {
            run_id: generate_run_id(),
            created_at: Utc::now(),
            config_hash: compute_config_hash(config),
            panel_fingerprint: panel_fingerprint(panel),
            num_tickers: panel.num_tickers(),
            num_dates: panel.len(),
            num_runs,
            inputs: Vec::new(),
            git: GitInfo::capture(),
        }
    }

    /// Record an input file with its checksum.
    pub fn with_input(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.inputs.push(track_data_file(path)?);
        Ok(self)
    }

    /// Write as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json(self, path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Compute SHA256 checksum of a file.
pub fn compute_file_checksum(path: impl AsRef<Path>) -> std::io::Result<String> {
    let data = std::fs::read(path.as_ref())?;
    Ok(compute_hash(&data))
}

/// Compute SHA256 hash of arbitrary bytes.
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compute configuration hash from JSON serialization.
pub fn compute_config_hash<T: Serialize + ?Sized>(config: &T) -> String {
    match serde_json::to_vec(config) {
        Ok(bytes) => compute_hash(&bytes),
        Err(e) => {
            warn!("Failed to serialize config for hashing: {}", e);
            String::new()
        }
    }
}

/// Content hash of a panel.
///
/// Covers tickers, dates, closes and returns; NaN cells hash by bit pattern.
pub fn panel_fingerprint(panel: &Panel) -> String {
    let mut hasher = Sha256::new();
    for ticker in panel.tickers() {
        hasher.update(ticker.as_bytes());
        hasher.update([0u8]);
    }
    for date in panel.dates() {
        hasher.update(date.to_string().as_bytes());
    }
    for ticker in panel.tickers() {
        if let Some(series) = panel.series(ticker) {
            for obs in series {
                hasher.update(obs.close.to_bits().to_le_bytes());
                hasher.update(obs.ret.to_bits().to_le_bytes());
            }
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Generate a unique run ID.
pub fn generate_run_id() -> Uuid {
    Uuid::new_v4()
}

/// Track input file metadata.
pub fn track_data_file(path: impl AsRef<Path>) -> std::io::Result<DataFileMetadata> {
    let path = path.as_ref();
    let size = std::fs::metadata(path)?.len();
    let checksum = compute_file_checksum(path)?;

    Ok(DataFileMetadata {
        path: path.display().to_string(),
        size,
        checksum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Observation;
    use chrono::NaiveDate;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn panel(close: f64) -> Panel {
        let obs = Observation {
            close,
            ..Observation::MISSING
        };
        Panel::new(
            vec!["SPY".to_string()],
            vec![NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()],
            vec![vec![obs]],
        )
        .unwrap()
    }

    #[test]
    fn test_compute_file_checksum() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "test data").unwrap();
        temp_file.flush().unwrap();

        let checksum = compute_file_checksum(temp_file.path()).unwrap();
        assert_eq!(checksum.len(), 64);
        assert!(checksum.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_compute_hash() {
        assert_eq!(compute_hash(b"hello"), compute_hash(b"hello"));
        assert_ne!(compute_hash(b"hello"), compute_hash(b"world"));
        assert_eq!(compute_hash(b"hello").len(), 64);
    }

    #[test]
    fn test_generate_run_id() {
        assert_ne!(generate_run_id(), generate_run_id());
    }

    #[test]
    fn test_panel_fingerprint() {
        assert_eq!(panel_fingerprint(&panel(100.0)), panel_fingerprint(&panel(100.0)));
        assert_ne!(panel_fingerprint(&panel(100.0)), panel_fingerprint(&panel(101.0)));
    }

    #[test]
    fn test_config_hash() {
        #[derive(Serialize)]
        struct Cfg {
            slippage: f64,
        }
        assert_eq!(
            compute_config_hash(&Cfg { slippage: 0.0005 }),
            compute_config_hash(&Cfg { slippage: 0.0005 })
        );
        assert_ne!(
            compute_config_hash(&Cfg { slippage: 0.0005 }),
            compute_config_hash(&Cfg { slippage: 0.001 })
        );
    }

    #[test]
    fn test_run_metadata_round_trip() {
        let mut input = NamedTempFile::new().unwrap();
        writeln!(input, "panel bytes").unwrap();
        input.flush().unwrap();

        let meta = RunMetadata::new(&vec![500.0, 2500.0], &panel(100.0), 6)
            .with_input(input.path())
            .unwrap();
        assert_eq!(meta.num_runs, 6);
        assert_eq!(meta.inputs.len(), 1);
        assert_eq!(meta.inputs[0].checksum.len(), 64);

        let out = NamedTempFile::new().unwrap();
        meta.save(out.path()).unwrap();
        let back = RunMetadata::load(out.path()).unwrap();
        assert_eq!(back, meta);
    }
}
