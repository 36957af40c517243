//! presence-core — Identity matching and debounce for attendance marking.
//!
//! Matches face embeddings against enrolled samples by cosine similarity and
//! turns per-frame matches into discrete "present" confirmations.

pub mod debounce;
pub mod matcher;
pub mod session;
pub mod types;

pub use debounce::{DebounceConfig, DebounceTracker, MissPolicy, Tick};
pub use matcher::{CosineMatcher, MatchEngine, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use session::{RecognitionSession, SessionConfig};
pub use types::{Embedding, Identity, MatchResult};
