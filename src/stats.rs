use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::models::StudySession;
use crate::progression::ProgressionState;

pub const WEEK_DAYS: i64 = 7;

pub const CHARACTER_TYPES: [&str; 8] = [
    "owl",
    "fox",
    "panda",
    "cat",
    "robot",
    "wizard",
    "astronaut",
    "dragon",
];

pub const DEFAULT_CHARACTER: &str = "owl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayBucket {
    pub date: NaiveDate,
    pub weekday: String,
    pub total_minutes: u32,
    pub sessions: u32,
}

fn weekday_label(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}

/// Seven buckets ending at `today`, oldest first. Sessions outside the window
/// are ignored.
pub fn weekly_buckets(sessions: &[StudySession], today: NaiveDate) -> Vec<DayBucket> {
    (0..WEEK_DAYS)
        .rev()
        .map(|offset| {
            let date = today - Duration::days(offset);
            let (total_minutes, count) = sessions
                .iter()
                .filter(|s| s.created_at.date_naive() == date)
                .fold((0u32, 0u32), |(minutes, count), s| {
                    (minutes.saturating_add(s.duration_minutes), count + 1)
                });

            DayBucket {
                date,
                weekday: weekday_label(date.weekday()).to_string(),
                total_minutes,
                sessions: count,
            }
        })
        .collect()
}

/// Consecutive days with at least one session, ending today or yesterday.
/// A day without study before that breaks the streak.
pub fn current_streak(study_days: &[NaiveDate], today: NaiveDate) -> u32 {
    let days: BTreeSet<NaiveDate> = study_days.iter().copied().collect();

    let mut cursor = if days.contains(&today) {
        today
    } else {
        today - Duration::days(1)
    };

    let mut streak = 0;
    while days.contains(&cursor) {
        streak += 1;
        cursor = cursor - Duration::days(1);
    }
    streak
}

pub fn level_title(level: u32) -> &'static str {
    match level {
        0..=4 => "Beginner Scholar",
        5..=9 => "Dedicated Learner",
        10..=14 => "Knowledge Seeker",
        15..=19 => "Academic Explorer",
        _ => "Master Scholar",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub level: u32,
    pub reward: String,
}

const MILESTONES: [(u32, &str); 4] = [
    (5, "New character unlocked"),
    (10, "Special study background"),
    (15, "Achievement badge"),
    (20, "Master title"),
];

pub fn next_milestone(level: u32) -> Option<Milestone> {
    MILESTONES
        .iter()
        .find(|(at, _)| *at > level)
        .map(|(at, reward)| Milestone {
            level: *at,
            reward: reward.to_string(),
        })
}

pub fn is_known_character(character: &str) -> bool {
    CHARACTER_TYPES.contains(&character)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwinView {
    pub level: u32,
    pub current_xp: u64,
    pub xp_to_next_level: u64,
    pub xp_needed: u64,
    pub progress_percent: f64,
    pub lifetime_xp: u64,
    pub title: String,
    pub next_milestone: Option<Milestone>,
    pub character_type: String,
}

impl TwinView {
    pub fn new(state: ProgressionState, character_type: String) -> Self {
        Self {
            level: state.level,
            current_xp: state.current_xp,
            xp_to_next_level: state.xp_to_next_level,
            xp_needed: state.xp_remaining(),
            progress_percent: state.progress_percent(),
            lifetime_xp: state.lifetime_xp(),
            title: level_title(state.level).to_string(),
            next_milestone: next_milestone(state.level),
            character_type,
        }
    }
}
