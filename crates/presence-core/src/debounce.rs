//! Consecutive-hit debounce and per-identity cooldown.
//!
//! Turns a noisy stream of per-frame matches into discrete confirmations.
//! Each identity accumulates its own hit counter; reaching the required
//! count confirms it once and starts a cooldown during which further
//! matches for that identity are suppressed.

use crate::types::MatchResult;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_REQUIRED_HITS: u32 = 3;
pub const DEFAULT_COOLDOWN_MS: i64 = 10_000;

/// What a frame without a match for some identity does to its counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissPolicy {
    /// Counters only change on a match for their own identity.
    #[default]
    Keep,
    /// A frame with no match at all clears every counter.
    ResetOnMiss,
    /// Every frame clears the counters of identities it did not match.
    ResetOthers,
}

impl FromStr for MissPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "reset-on-miss" => Ok(Self::ResetOnMiss),
            "reset-others" => Ok(Self::ResetOthers),
            other => Err(format!(
                "unknown miss policy {other:?} (expected keep, reset-on-miss or reset-others)"
            )),
        }
    }
}

impl fmt::Display for MissPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Keep => "keep",
            Self::ResetOnMiss => "reset-on-miss",
            Self::ResetOthers => "reset-others",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    /// Consecutive matches needed before an identity is confirmed.
    pub required_hits: u32,
    /// Window after a confirmation during which the identity is ignored.
    pub cooldown: Duration,
    pub miss_policy: MissPolicy,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            required_hits: DEFAULT_REQUIRED_HITS,
            cooldown: Duration::milliseconds(DEFAULT_COOLDOWN_MS),
            miss_policy: MissPolicy::Keep,
        }
    }
}

/// Outcome of feeding one frame through the tracker (or a session).
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Nothing matched in this frame.
    NoMatch,
    /// A match was seen but not counted (manual mode).
    Detected { identity: String, confidence: f32 },
    /// Counting towards confirmation.
    Accumulating {
        identity: String,
        confidence: f32,
        hits: u32,
        required: u32,
    },
    /// Threshold reached; the caller should record attendance.
    Confirmed { identity: String, confidence: f32 },
    /// Suppressed by the cooldown of an earlier confirmation.
    RecentlyMarked { identity: String, confidence: f32 },
}

impl Tick {
    pub fn identity(&self) -> Option<&str> {
        match self {
            Tick::NoMatch => None,
            Tick::Detected { identity, .. }
            | Tick::Accumulating { identity, .. }
            | Tick::Confirmed { identity, .. }
            | Tick::RecentlyMarked { identity, .. } => Some(identity),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Tick::Confirmed { .. })
    }
}

/// Per-identity hit counters and last-confirmation clocks.
///
/// In-memory only. Mutated solely by the frame-processing path, which is
/// serialized by the engine thread, so no locking.
#[derive(Debug, Default)]
pub struct DebounceTracker {
    config: DebounceConfig,
    hits: HashMap<String, u32>,
    last_confirmed: HashMap<String, DateTime<Utc>>,
}

impl DebounceTracker {
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            config,
            hits: HashMap::new(),
            last_confirmed: HashMap::new(),
        }
    }

    pub fn config(&self) -> &DebounceConfig {
        &self.config
    }

    /// Feed the match result of one frame observed at `now`.
    pub fn observe(&mut self, matched: Option<&MatchResult>, now: DateTime<Utc>) -> Tick {
        let Some(m) = matched else {
            if self.config.miss_policy != MissPolicy::Keep {
                self.hits.clear();
            }
            return Tick::NoMatch;
        };

        if self.config.miss_policy == MissPolicy::ResetOthers {
            self.hits.retain(|id, _| id == &m.identity);
        }

        if let Some(last) = self.last_confirmed.get(&m.identity) {
            if now.signed_duration_since(*last) < self.config.cooldown {
                tracing::debug!(identity = %m.identity, "match suppressed by cooldown");
                return Tick::RecentlyMarked {
                    identity: m.identity.clone(),
                    confidence: m.similarity,
                };
            }
        }

        let required = self.config.required_hits.max(1);
        let counter = self.hits.entry(m.identity.clone()).or_insert(0);
        *counter += 1;
        let hits = *counter;

        if hits >= required {
            *counter = 0;
            self.last_confirmed.insert(m.identity.clone(), now);
            tracing::info!(identity = %m.identity, confidence = m.similarity, "identity confirmed");
            Tick::Confirmed {
                identity: m.identity.clone(),
                confidence: m.similarity,
            }
        } else {
            Tick::Accumulating {
                identity: m.identity.clone(),
                confidence: m.similarity,
                hits,
                required,
            }
        }
    }

    /// Current hit count for an identity (0 when idle).
    pub fn hits(&self, identity: &str) -> u32 {
        self.hits.get(identity).copied().unwrap_or(0)
    }

    pub fn last_confirmed(&self, identity: &str) -> Option<DateTime<Utc>> {
        self.last_confirmed.get(identity).copied()
    }

    /// Drop in-flight counters, keeping cooldown clocks.
    pub fn clear_counters(&mut self) {
        self.hits.clear();
    }

    /// Forget everything, including cooldowns.
    pub fn reset(&mut self) {
        self.hits.clear();
        self.last_confirmed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_704_880_000_000 + ms).unwrap()
    }

    fn hit(identity: &str) -> MatchResult {
        MatchResult {
            identity: identity.to_string(),
            similarity: 0.9,
        }
    }

    fn tracker(policy: MissPolicy) -> DebounceTracker {
        DebounceTracker::new(DebounceConfig {
            miss_policy: policy,
            ..DebounceConfig::default()
        })
    }

    #[test]
    fn test_three_hits_confirm_once_then_cooldown() {
        let mut t = tracker(MissPolicy::Keep);
        let alice = hit("7_Alice");

        let ticks: Vec<Tick> = (0..4).map(|i| t.observe(Some(&alice), at(i * 100))).collect();

        assert!(matches!(ticks[0], Tick::Accumulating { hits: 1, required: 3, .. }));
        assert!(matches!(ticks[1], Tick::Accumulating { hits: 2, .. }));
        assert!(ticks[2].is_confirmed());
        assert!(matches!(ticks[3], Tick::RecentlyMarked { .. }));
        assert_eq!(ticks.iter().filter(|t| t.is_confirmed()).count(), 1);
        assert_eq!(t.hits("7_Alice"), 0);
        assert_eq!(t.last_confirmed("7_Alice"), Some(at(200)));
    }

    #[test]
    fn test_counting_resumes_after_cooldown() {
        let mut t = tracker(MissPolicy::Keep);
        let alice = hit("7_Alice");
        for i in 0..3 {
            t.observe(Some(&alice), at(i));
        }

        // Cooldown is measured from the confirmation at t=2.
        assert!(matches!(t.observe(Some(&alice), at(10_001)), Tick::RecentlyMarked { .. }));
        assert!(matches!(
            t.observe(Some(&alice), at(10_002)),
            Tick::Accumulating { hits: 1, .. }
        ));
    }

    #[test]
    fn test_other_identity_does_not_decay_counter() {
        let mut t = tracker(MissPolicy::Keep);
        t.observe(Some(&hit("1_A")), at(0));
        t.observe(Some(&hit("1_A")), at(1));
        t.observe(Some(&hit("2_B")), at(2));
        t.observe(None, at(3));
        assert_eq!(t.hits("1_A"), 2);
        assert!(t.observe(Some(&hit("1_A")), at(4)).is_confirmed());
    }

    #[test]
    fn test_reset_on_miss_clears_on_empty_frame() {
        let mut t = tracker(MissPolicy::ResetOnMiss);
        t.observe(Some(&hit("1_A")), at(0));
        t.observe(Some(&hit("2_B")), at(1));
        assert_eq!(t.hits("1_A"), 1);

        assert_eq!(t.observe(None, at(2)), Tick::NoMatch);
        assert_eq!(t.hits("1_A"), 0);
        assert_eq!(t.hits("2_B"), 0);
    }

    #[test]
    fn test_reset_others_requires_strict_consecutive() {
        let mut t = tracker(MissPolicy::ResetOthers);
        t.observe(Some(&hit("1_A")), at(0));
        t.observe(Some(&hit("1_A")), at(1));
        t.observe(Some(&hit("2_B")), at(2));
        assert_eq!(t.hits("1_A"), 0);
        assert_eq!(t.hits("2_B"), 1);
    }

    #[test]
    fn test_reset_forgets_cooldown() {
        let mut t = DebounceTracker::new(DebounceConfig {
            required_hits: 1,
            ..DebounceConfig::default()
        });
        assert!(t.observe(Some(&hit("1_A")), at(0)).is_confirmed());
        assert!(matches!(t.observe(Some(&hit("1_A")), at(1)), Tick::RecentlyMarked { .. }));
        t.reset();
        assert!(t.observe(Some(&hit("1_A")), at(2)).is_confirmed());
    }

    #[test]
    fn test_miss_policy_parse_and_display() {
        for policy in [MissPolicy::Keep, MissPolicy::ResetOnMiss, MissPolicy::ResetOthers] {
            assert_eq!(policy.to_string().parse::<MissPolicy>(), Ok(policy));
        }
        assert!("sometimes".parse::<MissPolicy>().is_err());
    }
}
