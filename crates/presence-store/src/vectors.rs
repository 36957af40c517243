//! Enrolled face vectors, one JSON file per installation.

use crate::error::{Result, StoreError};
use crate::files::{read_optional, write_atomic, FileLocks};
use presence_core::{Embedding, MatchEngine};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identity key → enrolled vectors, in enrollment order per identity.
pub type Enrollments = BTreeMap<String, Vec<Embedding>>;

#[derive(Debug, Clone)]
pub struct VectorStore {
    path: PathBuf,
    locks: Arc<FileLocks>,
}

impl VectorStore {
    pub fn new(path: impl Into<PathBuf>, locks: Arc<FileLocks>) -> Self {
        Self {
            path: path.into(),
            locks,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append samples for an identity. Returns how many it now has.
    pub fn enroll(&self, identity: &str, vectors: Vec<Embedding>) -> Result<usize> {
        self.locks.with(&self.path, || {
            let mut all = read_enrollments(&self.path)?;
            let samples = all.entry(identity.to_string()).or_default();
            samples.extend(vectors);
            let total = samples.len();
            write_enrollments(&self.path, &all)?;
            tracing::info!(identity, total, "vectors enrolled");
            Ok(total)
        })
    }

    pub fn load_all(&self) -> Result<Enrollments> {
        self.locks.with(&self.path, || read_enrollments(&self.path))
    }

    pub fn get(&self, identity: &str) -> Result<Vec<Embedding>> {
        Ok(self.load_all()?.remove(identity).unwrap_or_default())
    }

    /// Drop an identity and its samples.
    pub fn remove(&self, identity: &str) -> Result<bool> {
        self.locks.with(&self.path, || {
            let mut all = read_enrollments(&self.path)?;
            if all.remove(identity).is_none() {
                return Ok(false);
            }
            write_enrollments(&self.path, &all)?;
            tracing::info!(identity, "enrollment removed");
            Ok(true)
        })
    }

    /// Enroll the stored samples of `identities` into `engine`, in the given
    /// order. Identities without samples are skipped. Returns how many were
    /// loaded.
    pub fn load_into(&self, engine: &mut MatchEngine, identities: &[String]) -> Result<usize> {
        let mut all = self.load_all()?;
        let mut loaded = 0;
        for identity in identities {
            match all.remove(identity) {
                Some(samples) if !samples.is_empty() => {
                    engine.enroll(identity, samples);
                    loaded += 1;
                }
                _ => tracing::debug!(identity = %identity, "no enrolled vectors"),
            }
        }
        Ok(loaded)
    }
}

fn read_enrollments(path: &Path) -> Result<Enrollments> {
    match read_optional(path)? {
        None => Ok(Enrollments::new()),
        Some(text) if text.trim().is_empty() => Ok(Enrollments::new()),
        Some(text) => serde_json::from_str(&text).map_err(|e| StoreError::corrupt(path, e)),
    }
}

fn write_enrollments(path: &Path, all: &Enrollments) -> Result<()> {
    let json = serde_json::to_vec(all).map_err(|e| StoreError::corrupt(path, e))?;
    write_atomic(path, &json)
}
