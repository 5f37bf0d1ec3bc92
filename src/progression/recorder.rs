use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProgressionError;

pub const XP_PER_MINUTE: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerMode {
    Stopwatch,
    Countdown,
}

impl TimerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerMode::Stopwatch => "stopwatch",
            TimerMode::Countdown => "countdown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "stopwatch" => Some(TimerMode::Stopwatch),
            "countdown" => Some(TimerMode::Countdown),
            _ => None,
        }
    }
}

impl fmt::Display for TimerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw timer state at the moment the user saves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerReading {
    Stopwatch {
        elapsed_seconds: u64,
    },
    Countdown {
        elapsed_seconds: u64,
        duration_seconds: u64,
        completed: bool,
    },
}

impl TimerReading {
    pub fn mode(&self) -> TimerMode {
        match self {
            TimerReading::Stopwatch { .. } => TimerMode::Stopwatch,
            TimerReading::Countdown { .. } => TimerMode::Countdown,
        }
    }

    /// A countdown that ran out counts as its configured duration, whatever
    /// the last tick reported.
    pub fn effective_seconds(&self) -> u64 {
        match *self {
            TimerReading::Stopwatch { elapsed_seconds } => elapsed_seconds,
            TimerReading::Countdown {
                duration_seconds,
                completed: true,
                ..
            } => duration_seconds,
            TimerReading::Countdown {
                elapsed_seconds, ..
            } => elapsed_seconds,
        }
    }

    pub fn target_duration_minutes(&self) -> Option<u32> {
        match *self {
            TimerReading::Stopwatch { .. } => None,
            TimerReading::Countdown {
                duration_seconds, ..
            } => Some(seconds_to_minutes(duration_seconds)),
        }
    }
}

/// A persist-ready study session. `xp_earned` is fixed here and never
/// recomputed from the stored row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStudySession {
    pub duration_minutes: u32,
    pub timer_mode: TimerMode,
    pub target_duration_minutes: Option<u32>,
    pub subject: Option<String>,
    pub notes: Option<String>,
    pub xp_earned: u64,
}

fn seconds_to_minutes(seconds: u64) -> u32 {
    u32::try_from(seconds / 60).unwrap_or(u32::MAX)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn xp_for_minutes(minutes: u32) -> u64 {
    u64::from(minutes) * XP_PER_MINUTE
}

pub fn record(
    reading: TimerReading,
    subject: Option<String>,
    notes: Option<String>,
) -> Result<NewStudySession, ProgressionError> {
    let effective_seconds = reading.effective_seconds();
    if effective_seconds == 0 {
        return Err(ProgressionError::EmptySession);
    }

    let duration_minutes = seconds_to_minutes(effective_seconds);

    Ok(NewStudySession {
        duration_minutes,
        timer_mode: reading.mode(),
        target_duration_minutes: reading.target_duration_minutes(),
        subject: non_blank(subject),
        notes: non_blank(notes),
        xp_earned: xp_for_minutes(duration_minutes),
    })
}
