use std::{collections::VecDeque, fmt};

use serde::{Deserialize, Serialize};

const TREND_LEN: usize = 30;
const RECENT_LEN: usize = 10;
const BUILD_RATIO: f32 = 1.2;
const DROP_RATIO: f32 = 1.5;
const DROP_HOLD_SECS: f32 = 1.0;

/// Build-up and drop flags derived from the loudness trend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dynamics {
    pub building: bool,
    pub drop: bool,
}

/// Watches loudness for a sustained rise followed by a sudden jump.
#[derive(Debug, Clone, Default)]
pub struct DynamicsTracker {
    trend: VecDeque<f32>,
    state: Dynamics,
    drop_at: Option<f32>,
}

impl DynamicsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, seconds: f32, intensity: f32) -> Dynamics {
        if self.trend.len() == TREND_LEN {
            self.trend.pop_front();
        }
        self.trend.push_back(intensity);

        if let Some(at) = self.drop_at {
            if seconds - at > DROP_HOLD_SECS {
                self.state.drop = false;
                self.drop_at = None;
            }
        }

        if self.trend.len() < RECENT_LEN {
            return self.state;
        }

        let split = self.trend.len() - RECENT_LEN;
        let recent_avg = mean(self.trend.iter().skip(split));
        let older_avg = if split == 0 {
            recent_avg
        } else {
            mean(self.trend.iter().take(split))
        };

        if !self.state.building && recent_avg > older_avg * BUILD_RATIO {
            self.state.building = true;
        }
        if self.state.building && intensity > recent_avg * DROP_RATIO {
            self.state.building = false;
            self.state.drop = true;
            self.drop_at = Some(seconds);
            tracing::debug!(intensity, "drop detected");
        }
        self.state
    }
}

fn mean<'a>(values: impl Iterator<Item = &'a f32>) -> f32 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

/// Coarse musical style guess used to bias advanced lighting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Genre {
    #[default]
    Auto,
    Edm,
    Rock,
    HipHop,
    Jazz,
    Ambient,
}

impl Genre {
    pub const DETECTABLE: [Genre; 5] = [
        Genre::Edm,
        Genre::Rock,
        Genre::HipHop,
        Genre::Jazz,
        Genre::Ambient,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Genre::Auto => "auto",
            Genre::Edm => "edm",
            Genre::Rock => "rock",
            Genre::HipHop => "hiphop",
            Genre::Jazz => "jazz",
            Genre::Ambient => "ambient",
        }
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const HINT_DECAY: f32 = 0.99;
const DOMINANT_SCORE: f32 = 0.5;

/// Accumulates decaying evidence for each [`Genre`] from tempo, bass and
/// beat regularity.
#[derive(Debug, Clone, Default)]
pub struct GenreDetector {
    scores: [f32; 5],
    detected: Genre,
}

impl GenreDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detected(&self) -> Genre {
        self.detected
    }

    pub fn update(&mut self, bpm: Option<f32>, bass: f32, has_beat: bool) -> Genre {
        for score in &mut self.scores {
            *score *= HINT_DECAY;
        }
        let bpm = bpm.unwrap_or(0.0);

        if (120.0..=140.0).contains(&bpm) && bass > 0.6 && has_beat {
            self.scores[0] += 0.1;
        }
        if (100.0..=140.0).contains(&bpm) && bass > 0.3 && bass < 0.7 {
            self.scores[1] += 0.1;
        }
        if (80.0..=100.0).contains(&bpm) && bass > 0.7 {
            self.scores[2] += 0.1;
        }
        if (60.0..=150.0).contains(&bpm) && !has_beat {
            self.scores[3] += 0.05;
        }
        if bpm < 80.0 && bass < 0.3 {
            self.scores[4] += 0.1;
        }

        let (best, score) = self
            .scores
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |acc, (i, s)| if *s > acc.1 { (i, *s) } else { acc });
        if score > DOMINANT_SCORE {
            self.detected = Genre::DETECTABLE[best];
        }
        self.detected
    }
}
