use serde::{Deserialize, Serialize};

/// Separator between the roll and the display name in an identity key.
pub const IDENTITY_SEPARATOR: char = '_';

/// Face embedding vector as produced by the upstream model (typically 128 or 512 values).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar. Only the common
    /// prefix is compared when dimensions differ. A zero-norm side yields 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            // Rounding can push |dot/denom| a hair past 1.0 for parallel vectors.
            (dot / denom).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// An identity key split into its roll and display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub roll: String,
    pub name: String,
}

impl Identity {
    /// Parse `"<roll>_<name>"`. Underscores left in the name become spaces.
    ///
    /// A key without a separator (or starting with one) has an empty roll
    /// and the whole key as its name. Both parts are trimmed, as ledger
    /// cells are trimmed when read back.
    pub fn parse(key: &str) -> Self {
        match key.find(IDENTITY_SEPARATOR) {
            Some(idx) if idx > 0 => Self {
                roll: key[..idx].trim().to_string(),
                name: key[idx + 1..]
                    .replace(IDENTITY_SEPARATOR, " ")
                    .trim()
                    .to_string(),
            },
            _ => Self {
                roll: String::new(),
                name: key.trim().to_string(),
            },
        }
    }

    /// Human-readable form, e.g. `Alice (7)`.
    pub fn display(&self) -> String {
        if self.roll.trim().is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.roll)
        }
    }
}

/// Result of matching a probe embedding against the enrolled set.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Identity key of the best-scoring enrolled vector.
    pub identity: String,
    /// Cosine similarity of the best match [-1, 1].
    pub similarity: f32,
}
