#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serial_test::serial;

    use crate::env::{AppConfig, DEFAULT_AI_MODEL};
    use crate::progression::service::MAX_BACKOFF;

    const VARS: [&str; 8] = [
        "ADMIN_USERNAME",
        "ADMIN_PASSWORD",
        "AI_GATEWAY_URL",
        "AI_API_KEY",
        "AI_MODEL",
        "XP_RETRY_MAX_ATTEMPTS",
        "XP_RETRY_BASE_DELAY_MS",
        "SESSION_TTL_HOURS",
    ];

    #[test]
    #[serial]
    fn test_defaults_apply_when_unset() {
        temp_env::with_vars_unset(VARS, || {
            let config = AppConfig::from_env().expect("Defaults should be valid");

            assert_eq!(config.retry.max_attempts, 5);
            assert_eq!(config.retry.base_delay, Duration::from_millis(25));
            assert_eq!(config.session_ttl_hours, 1);
            assert_eq!(config.ai_model, DEFAULT_AI_MODEL);
            assert_eq!(config.ai_api_key, None);
            assert!(config.admin.is_none());
        });
    }

    #[test]
    #[serial]
    fn test_overrides_are_parsed() {
        temp_env::with_vars(
            [
                ("XP_RETRY_MAX_ATTEMPTS", Some("8")),
                ("XP_RETRY_BASE_DELAY_MS", Some(" 40 ")),
                ("SESSION_TTL_HOURS", Some("12")),
                ("AI_API_KEY", Some("sk-test")),
                ("AI_MODEL", Some("local/tiny")),
            ],
            || {
                let config = AppConfig::from_env().expect("Overrides should be valid");

                assert_eq!(config.retry.max_attempts, 8);
                assert_eq!(config.retry.base_delay, Duration::from_millis(40));
                assert_eq!(config.session_ttl_hours, 12);
                assert_eq!(config.ai_api_key.as_deref(), Some("sk-test"));
                assert_eq!(config.ai_model, "local/tiny");
            },
        );
    }

    #[test]
    #[serial]
    fn test_invalid_values_are_rejected() {
        temp_env::with_var("XP_RETRY_MAX_ATTEMPTS", Some("lots"), || {
            let err = AppConfig::from_env().expect_err("Non-numeric attempts must fail");
            assert!(err.to_string().contains("XP_RETRY_MAX_ATTEMPTS"));
        });

        temp_env::with_var("XP_RETRY_MAX_ATTEMPTS", Some("0"), || {
            assert!(AppConfig::from_env().is_err(), "Zero attempts must fail");
        });
    }

    #[test]
    #[serial]
    fn test_retry_delay_grows_with_attempts() {
        temp_env::with_vars_unset(VARS, || {
            let retry = AppConfig::from_env().expect("Defaults should be valid").retry;

            let first = retry.delay_for(1);
            let third = retry.delay_for(3);

            // 25ms plus at most 50% jitter, then 100ms plus at most 50%.
            assert!(first >= Duration::from_millis(25) && first <= Duration::from_millis(37));
            assert!(third >= Duration::from_millis(100) && third <= Duration::from_millis(150));

            let late = retry.delay_for(40);
            assert!(late >= MAX_BACKOFF && late <= MAX_BACKOFF + MAX_BACKOFF / 2);
        });
    }

    #[test]
    #[serial]
    fn test_admin_bootstrap_needs_both_credentials() {
        temp_env::with_vars(
            [
                ("ADMIN_USERNAME", Some(" principal ")),
                ("ADMIN_PASSWORD", Some("correct-horse")),
            ],
            || {
                let admin = AppConfig::from_env()
                    .expect("Bootstrap should be valid")
                    .admin
                    .expect("Admin should be configured");

                assert_eq!(admin.username, "principal");
                assert_eq!(admin.password, "correct-horse");
                assert!(!format!("{:?}", admin).contains("correct-horse"));
            },
        );

        temp_env::with_vars(
            [
                ("ADMIN_USERNAME", Some("principal")),
                ("ADMIN_PASSWORD", None),
            ],
            || {
                let err = AppConfig::from_env().expect_err("A lone username must fail");
                assert!(err.to_string().contains("set together"));
            },
        );

        temp_env::with_vars(
            [
                ("ADMIN_USERNAME", Some("principal")),
                ("ADMIN_PASSWORD", Some("short")),
            ],
            || {
                assert!(AppConfig::from_env().is_err(), "Short passwords must fail");
            },
        );
    }
}
