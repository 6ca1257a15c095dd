//! Execution-profile data for profile-guided optimization.
//!
//! A profile is produced by an instrumented run and loaded once at
//! optimizer start; it is read-only for the rest of the compile. It
//! only shifts inlining thresholds, never correctness.
//!
//! On-disk format: the 4-byte magic `PGO1`, a little-endian `u32` entry
//! count, then per entry a 64-byte NUL-padded name and a little-endian
//! `u64` count. Function entries use the bare function name; call-edge
//! entries use `caller:callee`.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

const MAGIC: &[u8; 4] = b"PGO1";
const NAME_SIZE: usize = 64;
const ENTRY_SIZE: usize = NAME_SIZE + 8;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to read profile: {0}")]
    Io(#[from] io::Error),
    #[error("not a profile file (bad magic)")]
    BadMagic,
    #[error("profile file truncated")]
    Truncated,
}

#[derive(Debug, Clone, Default)]
pub struct Profile {
    counts: HashMap<String, u64>,
    /// Largest per-function invocation count; the hot/cold thresholds
    /// are ratios of this.
    max_count: u64,
}

impl Profile {
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        Self::parse(&fs::read(path)?)
    }

    pub fn parse(data: &[u8]) -> Result<Self, ProfileError> {
        if data.len() < 8 {
            return Err(ProfileError::Truncated);
        }
        if &data[0..4] != MAGIC {
            return Err(ProfileError::BadMagic);
        }
        let n = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
        let body = &data[8..];
        if body.len() < n * ENTRY_SIZE {
            return Err(ProfileError::Truncated);
        }

        let mut counts = HashMap::new();
        let mut max_count = 0;
        for entry in body.chunks_exact(ENTRY_SIZE).take(n) {
            let name_bytes = &entry[..NAME_SIZE];
            let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
            let name = String::from_utf8_lossy(&name_bytes[..end]).into_owned();
            let count = u64::from_le_bytes(
                entry[NAME_SIZE..]
                    .try_into()
                    .map_err(|_| ProfileError::Truncated)?,
            );
            // Edge entries carry a colon; only function entries set the
            // hotness ceiling.
            if !name.contains(':') && count > max_count {
                max_count = count;
            }
            counts.insert(name, count);
        }
        Ok(Profile { counts, max_count })
    }

    pub fn count(&self, func: &str) -> u64 {
        self.counts.get(func).copied().unwrap_or(0)
    }

    pub fn edge_count(&self, caller: &str, callee: &str) -> u64 {
        self.counts
            .get(&format!("{caller}:{callee}"))
            .copied()
            .unwrap_or(0)
    }

    pub fn max_count(&self) -> u64 {
        self.max_count
    }

    /// A function is hot when it runs at least a tenth as often as the
    /// busiest function in the profile. The threshold truncates, so
    /// with a small ceiling even a single invocation can qualify.
    pub fn is_hot(&self, func: &str) -> bool {
        self.max_count > 0 && self.count(func) >= self.max_count / 10
    }

    /// Never invoked, or at most a hundredth of the busiest function.
    pub fn is_cold(&self, func: &str) -> bool {
        let c = self.count(func);
        if c == 0 {
            return true;
        }
        self.max_count > 0 && c <= self.max_count / 100
    }

    /// A call site is hot when its edge was hit often enough, or when
    /// the callee itself is hot.
    pub fn site_is_hot(&self, caller: &str, callee: &str) -> bool {
        (self.max_count > 0 && self.edge_count(caller, callee) >= self.max_count / 10)
            || self.is_hot(callee)
    }
}
