use serde::{Deserialize, Serialize};

pub const XP_PER_LEVEL_STEP: u64 = 100;

/// XP needed to advance out of `level`. Linear: level 1 needs 100, level 2 needs 200.
pub fn threshold_for_level(level: u32) -> u64 {
    u64::from(level) * XP_PER_LEVEL_STEP
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionState {
    pub level: u32,
    pub current_xp: u64,
    pub xp_to_next_level: u64,
}

impl Default for ProgressionState {
    fn default() -> Self {
        Self {
            level: 1,
            current_xp: 0,
            xp_to_next_level: threshold_for_level(1),
        }
    }
}

impl ProgressionState {
    pub fn new(level: u32, current_xp: u64) -> Self {
        Self {
            level,
            current_xp,
            xp_to_next_level: threshold_for_level(level),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.level >= 1
            && self.xp_to_next_level == threshold_for_level(self.level)
            && self.current_xp < self.xp_to_next_level
    }

    /// Total XP earned to reach this state from level 1 with zero XP.
    pub fn lifetime_xp(&self) -> u64 {
        let completed = u64::from(self.level.saturating_sub(1));
        // 100 * (1 + 2 + ... + completed)
        XP_PER_LEVEL_STEP * completed * (completed + 1) / 2 + self.current_xp
    }

    pub fn xp_remaining(&self) -> u64 {
        self.xp_to_next_level.saturating_sub(self.current_xp)
    }

    pub fn progress_percent(&self) -> f64 {
        if self.xp_to_next_level == 0 {
            return 0.0;
        }
        self.current_xp as f64 / self.xp_to_next_level as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelUpdate {
    pub state: ProgressionState,
    pub leveled_up: bool,
    pub levels_gained: u32,
}

/// Folds `xp_delta` into `state`, crossing as many level thresholds as the
/// total covers. The threshold is recomputed for each new level before the
/// next comparison.
pub fn apply_xp(state: ProgressionState, xp_delta: u64) -> LevelUpdate {
    let old_level = state.level;
    let mut level = state.level;
    let mut threshold = state.xp_to_next_level;
    let mut total = state.current_xp.saturating_add(xp_delta);

    // A zero threshold would never terminate; treat it as the level's own.
    if threshold == 0 {
        level = level.max(1);
        threshold = threshold_for_level(level);
    }

    while total >= threshold {
        total -= threshold;
        level = level.saturating_add(1);
        threshold = threshold_for_level(level);
    }

    LevelUpdate {
        state: ProgressionState {
            level,
            current_xp: total,
            xp_to_next_level: threshold,
        },
        leveled_up: level > old_level,
        levels_gained: level - old_level,
    }
}

/// Rebuilds a consistent state from stored columns that may have been
/// corrupted: clamps negatives, resets the threshold to the level's own and
/// folds any overflowed XP with a zero delta.
pub fn normalize(level: i64, current_xp: i64) -> ProgressionState {
    let level = u32::try_from(level.max(1)).unwrap_or(u32::MAX);
    let current_xp = u64::try_from(current_xp).unwrap_or(0);

    apply_xp(ProgressionState::new(level, current_xp), 0).state
}
