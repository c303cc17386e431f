//! Shared fixtures and helper functions for config tests.

use crate::config::AppConfig;
use ortho_config::MergeComposer;
use rstest::fixture;
use std::sync::Arc;

/// Fixture providing an `AppConfig` parsed from a full TOML example.
#[fixture]
pub fn app_config_from_full_toml() -> AppConfig {
    let toml = r#"
        [poll]
        interval_secs = 5
        timeout_secs = 300

        [intervals.default.wait-deployment]
        interval_secs = 10
        timeout_secs = 1200

        [intervals.upgrade.wait-available]
        interval_secs = 10
        timeout_secs = 1800

        [intervals.upgrade.wait-provisioned]
        interval_secs = 15
        timeout_secs = 2400

        [retry]
        max_attempts = 3
        backoff_ms = 500

        [cleanup]
        skip = true
        action_timeout_secs = 120

        [flow]
        deadline_secs = 7200
    "#;

    toml::from_str(toml).expect("TOML parsing should succeed")
}

/// Fixture providing an `AppConfig` parsed from a minimal TOML example.
#[fixture]
pub fn app_config_from_partial_toml() -> AppConfig {
    let toml = r"
        [retry]
        max_attempts = 5
    ";

    toml::from_str(toml).expect("TOML parsing should succeed")
}

/// Helper: Creates a `MergeComposer` with defaults layer already pushed.
pub fn create_composer_with_defaults() -> Result<MergeComposer, serde_json::Error> {
    let mut composer = MergeComposer::new();
    let defaults = ortho_config::serde_json::to_value(AppConfig::default())?;
    composer.push_defaults(defaults);
    Ok(composer)
}

/// Helper: Merges layers from a composer into `AppConfig`.
pub fn merge_config(composer: MergeComposer) -> Result<AppConfig, Arc<ortho_config::OrthoError>> {
    AppConfig::merge_from_layers(composer.layers())
}

/// Helper: Asserts that a config has all default values.
pub fn assert_config_has_defaults(config: &AppConfig) {
    assert_eq!(
        config.poll.interval_secs, 10,
        "poll.interval_secs should be 10"
    );
    assert_eq!(
        config.poll.timeout_secs, 600,
        "poll.timeout_secs should be 600"
    );
    assert!(config.intervals.is_empty(), "intervals should be empty");
    assert_eq!(
        config.retry.max_attempts, 2,
        "retry.max_attempts should be 2"
    );
    assert_eq!(config.retry.backoff_ms, 0, "retry.backoff_ms should be 0");
    assert!(!config.cleanup.skip, "cleanup.skip should be false");
    assert!(
        config.cleanup.action_timeout_secs.is_none(),
        "cleanup.action_timeout_secs should be None"
    );
    assert!(
        config.flow.deadline_secs.is_none(),
        "flow.deadline_secs should be None"
    );
}

/// Helper: Creates a `MergeComposer` with defaults, file, and env layers for testing layer precedence.
pub fn create_composer_with_file_and_env() -> Result<MergeComposer, serde_json::Error> {
    use ortho_config::serde_json::json;

    let mut composer = create_composer_with_defaults()?;

    composer.push_file(
        json!({
            "retry": { "max_attempts": 3, "backoff_ms": 250 },
            "cleanup": { "skip": true }
        }),
        None,
    );

    composer.push_environment(json!({
        "retry": { "max_attempts": 7 }
    }));

    Ok(composer)
}
