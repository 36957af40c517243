//! Per-group recognition session.
//!
//! A session is built when a group is selected and dropped when another is
//! selected, so enrolled vectors and debounce state never leak across groups.

use crate::debounce::{DebounceConfig, DebounceTracker, Tick};
use crate::matcher::{MatchEngine, DEFAULT_MATCH_THRESHOLD};
use crate::types::Embedding;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub similarity_threshold: f32,
    pub debounce: DebounceConfig,
    /// Confirm automatically; when off, matches are only reported.
    pub auto_mark: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_MATCH_THRESHOLD,
            debounce: DebounceConfig::default(),
            auto_mark: true,
        }
    }
}

pub struct RecognitionSession {
    group: String,
    engine: MatchEngine,
    tracker: DebounceTracker,
    threshold: f32,
    auto_mark: bool,
}

impl RecognitionSession {
    pub fn new(group: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            group: group.into(),
            engine: MatchEngine::default(),
            tracker: DebounceTracker::new(config.debounce),
            threshold: config.similarity_threshold,
            auto_mark: config.auto_mark,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut MatchEngine {
        &mut self.engine
    }

    pub fn tracker(&self) -> &DebounceTracker {
        &self.tracker
    }

    pub fn auto_mark(&self) -> bool {
        self.auto_mark
    }

    /// Switch between automatic and manual marking. In-flight counters are
    /// dropped either way.
    pub fn set_auto_mark(&mut self, enabled: bool) {
        self.auto_mark = enabled;
        self.tracker.clear_counters();
        tracing::info!(group = %self.group, auto_mark = enabled, "marking mode changed");
    }

    /// Match one frame's embedding and advance the debounce state.
    pub fn process(&mut self, embedding: &Embedding, now: DateTime<Utc>) -> Tick {
        let matched = self.engine.recognize(embedding, self.threshold);
        if !self.auto_mark {
            return match matched {
                Some(m) => Tick::Detected {
                    identity: m.identity,
                    confidence: m.similarity,
                },
                None => Tick::NoMatch,
            };
        }
        self.tracker.observe(matched.as_ref(), now)
    }

    /// Drop enrollment and debounce state. Used before the session is replaced.
    pub fn clear(&mut self) {
        self.engine.clear();
        self.tracker.reset();
    }
}
