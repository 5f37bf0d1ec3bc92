#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use crate::models::StudySession;
    use crate::progression::{ProgressionState, TimerMode};
    use crate::stats::{
        DEFAULT_CHARACTER, TwinView, current_streak, is_known_character, level_title,
        next_milestone, weekly_buckets,
    };

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn session_at(y: i32, m: u32, d: u32, hour: u32, minutes: u32) -> StudySession {
        StudySession {
            id: 0,
            user_id: 1,
            duration_minutes: minutes,
            timer_mode: TimerMode::Stopwatch,
            target_duration_minutes: None,
            subject: None,
            notes: None,
            xp_earned: u64::from(minutes) * 2,
            created_at: Utc
                .with_ymd_and_hms(y, m, d, hour, 0, 0)
                .single()
                .expect("valid timestamp"),
        }
    }

    #[test]
    fn test_weekly_buckets_cover_seven_days_oldest_first() {
        let today = day(2025, 6, 8);
        let sessions = vec![
            session_at(2025, 6, 8, 9, 25),
            session_at(2025, 6, 8, 20, 50),
            session_at(2025, 6, 5, 12, 30),
            session_at(2025, 6, 2, 23, 15),
            // Outside the window.
            session_at(2025, 6, 1, 10, 90),
        ];

        let buckets = weekly_buckets(&sessions, today);

        assert_eq!(buckets.len(), 7);
        assert_eq!(buckets[0].date, day(2025, 6, 2));
        assert_eq!(buckets[0].weekday, "Mon");
        assert_eq!(buckets[0].total_minutes, 15);
        assert_eq!(buckets[3].date, day(2025, 6, 5));
        assert_eq!(buckets[3].total_minutes, 30);
        assert_eq!(buckets[6].date, today);
        assert_eq!(buckets[6].weekday, "Sun");
        assert_eq!(buckets[6].total_minutes, 75);
        assert_eq!(buckets[6].sessions, 2);

        let total: u32 = buckets.iter().map(|b| b.total_minutes).sum();
        assert_eq!(total, 120);
    }

    #[test]
    fn test_streak_counts_back_from_today() {
        let today = day(2025, 6, 8);
        let days = vec![day(2025, 6, 8), day(2025, 6, 7), day(2025, 6, 6), day(2025, 6, 3)];

        assert_eq!(current_streak(&days, today), 3);
    }

    #[test]
    fn test_streak_survives_until_today_is_over() {
        let today = day(2025, 6, 8);
        let days = vec![day(2025, 6, 7), day(2025, 6, 6)];

        assert_eq!(current_streak(&days, today), 2);
    }

    #[test]
    fn test_streak_broken_by_missed_day() {
        let today = day(2025, 6, 8);

        assert_eq!(current_streak(&[day(2025, 6, 6)], today), 0);
        assert_eq!(current_streak(&[], today), 0);
    }

    #[test]
    fn test_level_titles_and_milestones() {
        assert_eq!(level_title(1), "Beginner Scholar");
        assert_eq!(level_title(5), "Dedicated Learner");
        assert_eq!(level_title(14), "Knowledge Seeker");
        assert_eq!(level_title(19), "Academic Explorer");
        assert_eq!(level_title(42), "Master Scholar");

        let milestone = next_milestone(4).expect("milestone ahead");
        assert_eq!(milestone.level, 5);
        assert_eq!(milestone.reward, "New character unlocked");
        assert_eq!(next_milestone(5).map(|m| m.level), Some(10));
        assert_eq!(next_milestone(20), None);
    }

    #[test]
    fn test_twin_view_derives_presentation_fields() {
        let view = TwinView::new(ProgressionState::new(3, 75), DEFAULT_CHARACTER.to_string());

        assert_eq!(view.level, 3);
        assert_eq!(view.xp_to_next_level, 300);
        assert_eq!(view.xp_needed, 225);
        assert!((view.progress_percent - 25.0).abs() < f64::EPSILON);
        assert_eq!(view.lifetime_xp, 375);
        assert_eq!(view.title, "Beginner Scholar");
        assert_eq!(view.character_type, "owl");
    }

    #[test]
    fn test_known_characters() {
        assert!(is_known_character("dragon"));
        assert!(is_known_character(DEFAULT_CHARACTER));
        assert!(!is_known_character("unicorn"));
    }
}
