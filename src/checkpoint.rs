// checkpoint.rs - Resume an interrupted scan
//
// After every identifier the scan saves which identifiers are done and the
// active rows collected so far. A later run over the same user, region and
// identifier list picks up from there. Credentials are never written: the
// user is stored as a hash and the secret not at all.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use crate::identifier::ProjectId;
use crate::record::{Region, ResultRow};

/// Checkpoint file name - hidden file to avoid cluttering output directory
pub const CHECKPOINT_FILENAME: &str = ".aprscan-checkpoint.json";

const CHECKPOINT_TEMP_FILENAME: &str = ".aprscan-checkpoint.tmp";

/// Current checkpoint format version - bump when making breaking changes
pub const CHECKPOINT_VERSION: u32 = 1;

/// Identifies which scan a checkpoint belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKey {
    pub user_hash: String,
    pub region: Region,
    pub identifiers_hash: String,
}

impl SessionKey {
    pub fn new(user: &str, region: Region, identifiers: &[ProjectId]) -> Self {
        Self {
            user_hash: hash_of(&user),
            region,
            identifiers_hash: hash_of(&identifiers.iter().map(ProjectId::as_str).collect::<Vec<_>>()),
        }
    }
}

fn hash_of<T: Hash + ?Sized>(value: &T) -> String {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Scan checkpoint containing all state needed to resume an interrupted scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint format version for compatibility checking
    pub version: u32,

    /// UTC timestamp of the last save
    pub created_at: DateTime<Utc>,

    pub key: SessionKey,

    /// Normalized identifiers already queried, in query order
    pub completed: Vec<String>,

    /// Active rows accumulated so far, in query order
    pub rows: Vec<ResultRow>,
}

impl Checkpoint {
    pub fn new(key: SessionKey) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            created_at: Utc::now(),
            key,
            completed: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Get the checkpoint file path for a given output directory
    pub fn get_checkpoint_path(output_dir: &Path) -> PathBuf {
        output_dir.join(CHECKPOINT_FILENAME)
    }

    /// Check if a checkpoint file exists in the given directory
    pub fn exists(output_dir: &Path) -> bool {
        Self::get_checkpoint_path(output_dir).exists()
    }

    /// Load a checkpoint from the given output directory.
    /// Fails if the file was written by an incompatible version.
    pub fn load(output_dir: &Path) -> Result<Self> {
        let path = Self::get_checkpoint_path(output_dir);
        let content = std::fs::read_to_string(&path)?;
        let checkpoint: Checkpoint = serde_json::from_str(&content)?;
        if checkpoint.version != CHECKPOINT_VERSION {
            anyhow::bail!(
                "Incompatible checkpoint version: file has version {} but current version is {}. \
                 Delete the checkpoint file to start fresh.",
                checkpoint.version,
                CHECKPOINT_VERSION
            );
        }
        Ok(checkpoint)
    }

    /// Save the checkpoint using write-to-temp then rename, so an interrupt
    /// never leaves a half-written file behind.
    pub fn save(&mut self, output_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(output_dir)?;
        let path = Self::get_checkpoint_path(output_dir);
        let temp_path = output_dir.join(CHECKPOINT_TEMP_FILENAME);

        self.created_at = Utc::now();
        let content = serde_json::to_string_pretty(self)?;

        {
            let mut file = std::fs::File::create(&temp_path)?;
            std::io::Write::write_all(&mut file, content.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// Delete the checkpoint file (called on successful completion)
    pub fn delete(output_dir: &Path) -> Result<()> {
        let path = Self::get_checkpoint_path(output_dir);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Check if this checkpoint was written for the same scan
    pub fn is_compatible(&self, key: &SessionKey) -> bool {
        &self.key == key
    }

    /// Record an identifier as queried along with the active rows it produced
    pub fn mark_completed(&mut self, id: &ProjectId, rows: &[ResultRow]) {
        if !self.is_completed(id) {
            self.completed.push(id.as_str().to_string());
            self.rows.extend_from_slice(rows);
        }
    }

    pub fn is_completed(&self, id: &ProjectId) -> bool {
        self.completed.iter().any(|done| done == id.as_str())
    }

    /// Identifiers still to query, preserving the given order
    pub fn remaining<'a>(&self, identifiers: &'a [ProjectId]) -> Vec<&'a ProjectId> {
        identifiers.iter().filter(|id| !self.is_completed(id)).collect()
    }

    /// Get summary statistics for the checkpoint
    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            region: self.key.region,
            created_at: self.created_at,
            completed_count: self.completed.len(),
            rows_count: self.rows.len(),
        }
    }
}

/// Summary of checkpoint state for display
#[derive(Debug, Clone)]
pub struct CheckpointSummary {
    pub region: Region,
    pub created_at: DateTime<Utc>,
    pub completed_count: usize,
    pub rows_count: usize,
}

impl std::fmt::Display for CheckpointSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Checkpoint for {} - {} identifiers queried, {} active records (saved {})",
            self.region,
            self.completed_count,
            self.rows_count,
            self.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

/// Resume mode options
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ResumeMode {
    /// Prompt user if checkpoint exists
    #[default]
    Prompt,
    /// Auto-resume if checkpoint exists
    AutoResume,
    /// Start fresh, ignore any existing checkpoint
    Fresh,
}
