//! Live performance metrics.
//!
//! Sub-scores are cheap heuristics over the latest exchange. They exist to
//! give the trainee a moving signal during the call and to back the final
//! evaluation when the remote scorer is unavailable. Every value is kept in
//! `[0, 100]`; missing input scores the neutral midpoint.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::storage::{word_count, MetricName, MetricRecord};

const NEUTRAL: u8 = 50;
const ACCURACY_BASE: i32 = 70;

const EMPATHY_MARKERS: &[&str] = &[
    "entiendo",
    "comprendo",
    "lamento",
    "gracias",
    "por favor",
    "understand",
    "sorry",
    "thank",
    "please",
    "appreciate",
];

/// Direction of the overall score against the previous snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    #[default]
    Stable,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Up => "up",
            Trend::Down => "down",
            Trend::Stable => "stable",
        }
    }

    fn between(previous: Option<u8>, current: u8) -> Self {
        match previous {
            Some(prev) if current > prev => Trend::Up,
            Some(prev) if current < prev => Trend::Down,
            _ => Trend::Stable,
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One recomputation of the live metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Number of user turns the snapshot was computed after.
    pub turn_index: usize,
    pub rapport: u8,
    pub clarity: u8,
    pub empathy: u8,
    pub accuracy: u8,
    pub overall: u8,
    pub trend: Trend,
    pub recorded_at: DateTime<Utc>,
}

impl MetricSnapshot {
    /// Midpoint scores, used before any user turn has been scored.
    pub fn neutral() -> Self {
        Self {
            turn_index: 0,
            rapport: NEUTRAL,
            clarity: NEUTRAL,
            empathy: NEUTRAL,
            accuracy: NEUTRAL,
            overall: NEUTRAL,
            trend: Trend::Stable,
            recorded_at: Utc::now(),
        }
    }

    pub fn value(&self, name: MetricName) -> u8 {
        match name {
            MetricName::Rapport => self.rapport,
            MetricName::Clarity => self.clarity,
            MetricName::Empathy => self.empathy,
            MetricName::Accuracy => self.accuracy,
            MetricName::Overall => self.overall,
        }
    }

    /// One persisted record per metric name.
    pub fn records(&self, session_id: &str) -> Vec<MetricRecord> {
        MetricName::ALL
            .iter()
            .map(|name| MetricRecord::new(session_id, *name, self.value(*name)))
            .collect()
    }
}

/// Unweighted mean, rounded, clamped.
pub fn composite(rapport: u8, clarity: u8, empathy: u8, accuracy: u8) -> u8 {
    let sum = rapport as f64 + clarity as f64 + empathy as f64 + accuracy as f64;
    clamp_score((sum / 4.0).round() as i64)
}

fn clamp_score(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

/// Computes a [`MetricSnapshot`] after each user turn.
pub struct MetricsEngine {
    rng: StdRng,
    jitter: u8,
    latest: Option<MetricSnapshot>,
}

impl MetricsEngine {
    /// `seed` fixes the accuracy jitter sequence; `None` seeds from entropy.
    pub fn new(seed: Option<u64>, jitter: u8) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            jitter: jitter.min(30),
            latest: None,
        }
    }

    pub fn latest(&self) -> Option<&MetricSnapshot> {
        self.latest.as_ref()
    }

    /// Recompute from the latest exchange. Blank text counts as missing.
    pub fn update(
        &mut self,
        latest_user_text: &str,
        latest_agent_text: &str,
        turn_index: usize,
    ) -> MetricSnapshot {
        let user = Some(latest_user_text.trim()).filter(|t| !t.is_empty());
        let agent = Some(latest_agent_text.trim()).filter(|t| !t.is_empty());

        let rapport = rapport_score(user, agent, turn_index);
        let clarity = clarity_score(user);
        let empathy = empathy_score(user);
        let accuracy = self.accuracy_score(user);
        let overall = composite(rapport, clarity, empathy, accuracy);

        let snapshot = MetricSnapshot {
            turn_index,
            rapport,
            clarity,
            empathy,
            accuracy,
            overall,
            trend: Trend::between(self.latest.as_ref().map(|s| s.overall), overall),
            recorded_at: Utc::now(),
        };

        self.latest = Some(snapshot.clone());
        snapshot
    }

    fn accuracy_score(&mut self, user: Option<&str>) -> u8 {
        if user.is_none() {
            return NEUTRAL;
        }
        let jitter = self.jitter as i32;
        let noise = if jitter == 0 {
            0
        } else {
            self.rng.gen_range(-jitter..=jitter)
        };
        clamp_score((ACCURACY_BASE + noise) as i64)
    }
}

/// Grows with the length of the conversation and with substantive answers,
/// more so when the seller answers a question the client asked.
fn rapport_score(user: Option<&str>, agent: Option<&str>, turn_index: usize) -> u8 {
    let Some(user) = user else {
        return NEUTRAL;
    };

    let words = word_count(user) as i64;
    let progress = (turn_index.min(6) * 5) as i64;
    let substance = match words {
        8..=60 => 15,
        0 => 0,
        _ => 5,
    };
    let answered = match agent {
        Some(agent) if agent.contains('?') && words >= 5 => 5,
        _ => 0,
    };

    clamp_score(40 + progress + substance + answered)
}

/// Best between 10 and 40 words; very short or rambling turns score lower.
fn clarity_score(user: Option<&str>) -> u8 {
    let Some(user) = user else {
        return NEUTRAL;
    };

    let words = word_count(user) as i64;
    let score = match words {
        0..=9 => 50 + words * 3,
        10..=40 => 85,
        _ => 85 - (words - 40) / 2,
    };
    clamp_score(score.max(30))
}

fn empathy_score(user: Option<&str>) -> u8 {
    let Some(user) = user else {
        return NEUTRAL;
    };

    let lower = user.to_lowercase();
    let hits = EMPATHY_MARKERS
        .iter()
        .filter(|marker| lower.contains(*marker))
        .count()
        .min(4) as i64;
    clamp_score(45 + hits * 12)
}
