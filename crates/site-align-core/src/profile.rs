use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Elapsed time of one named processing stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub name: String,
    pub micros: u64,
}

/// Sequence of named timestamps collected while processing one frame.
///
/// Each stamp closes the stage that started at the previous stamp (or at the
/// last [`reset`](Self::reset)).
#[derive(Clone, Debug)]
pub struct TimeProfile {
    start: Instant,
    stamps: Vec<(&'static str, Instant)>,
}

impl Default for TimeProfile {
    fn default() -> Self {
        Self {
            start: Instant::now(),
            stamps: Vec::new(),
        }
    }
}

impl TimeProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.start = Instant::now();
        self.stamps.clear();
    }

    pub fn stamp(&mut self, name: &'static str) {
        self.stamps.push((name, Instant::now()));
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    /// Time from the last reset to the last stamp.
    pub fn total(&self) -> Duration {
        self.stamps
            .last()
            .map(|(_, t)| t.duration_since(self.start))
            .unwrap_or_default()
    }

    pub fn durations(&self) -> Vec<StageTiming> {
        let mut prev = self.start;
        self.stamps
            .iter()
            .map(|&(name, t)| {
                let micros = t.duration_since(prev).as_micros() as u64;
                prev = t;
                StageTiming {
                    name: name.to_string(),
                    micros,
                }
            })
            .collect()
    }
}
