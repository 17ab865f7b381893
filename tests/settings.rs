//! Settings loading and logging setup.

use omxyz_stage::axis::{AxisId, RoundingPolicy};
use omxyz_stage::error::StageError;
use omxyz_stage::logging::{self, OutputFormat, TracingConfig};
use omxyz_stage::settings::PluginSettings;
use serial_test::serial;
use std::io::Write;
use tempfile::NamedTempFile;

const SAMPLE: &str = r#"
dry_run = true
echo_commands = true
rounding = "floor"
tolerance = 0.02
settle_margin_ms = 250

[log]
level = "debug"
format = "json"

[[soft_limits]]
axis = "rot1"
min = -180.0
max = 180.0
"#;

fn settings_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_load_from_toml_file() {
    let file = settings_file(SAMPLE);
    let settings = PluginSettings::load_from(file.path()).unwrap();

    assert!(settings.dry_run);
    assert!(settings.echo_commands);
    assert_eq!(settings.rounding, Some(RoundingPolicy::Floor));
    assert_eq!(settings.tolerance, Some(0.02));
    assert_eq!(settings.settle_margin_ms, 250);
    assert_eq!(settings.max_blocking_wait_ms, 600_000);
    assert_eq!(settings.log.level, "debug");
    assert_eq!(settings.log.format, OutputFormat::Json);
    assert_eq!(settings.soft_limits.len(), 1);
    assert_eq!(settings.soft_limits[0].axis, AxisId::Rot1);
    assert!(settings.validate().is_ok());
}

#[test]
#[serial]
fn test_missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let settings = PluginSettings::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(settings, PluginSettings::default());
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = settings_file(SAMPLE);
    std::env::set_var("OMXYZ_LOG__LEVEL", "warn");
    std::env::set_var("OMXYZ_DRY_RUN", "false");

    let settings = PluginSettings::load_from(file.path());

    std::env::remove_var("OMXYZ_LOG__LEVEL");
    std::env::remove_var("OMXYZ_DRY_RUN");

    let settings = settings.unwrap();
    assert_eq!(settings.log.level, "warn");
    assert!(!settings.dry_run);
    assert!(settings.echo_commands);
}

#[test]
#[serial]
fn test_malformed_file_is_a_settings_error() {
    let file = settings_file("settle_margin_ms = \"soon\"\n");
    let err = PluginSettings::load_from(file.path()).unwrap_err();
    assert!(matches!(err, StageError::Settings(_)));
    assert!(!err.is_configuration());
}

#[test]
#[serial]
fn test_invalid_limits_rejected() {
    let file = settings_file(
        r#"
[[soft_limits]]
axis = "x"
min = 5.0
max = -5.0
"#,
    );
    let settings = PluginSettings::load_from(file.path()).unwrap();
    let err = settings.validate().unwrap_err();
    assert!(err.to_string().contains("Invalid soft limits for axis x"));
}

#[test]
#[serial]
fn test_rendered_settings_load_back() {
    let mut settings = PluginSettings::default();
    settings.echo_commands = true;
    settings.rounding = Some(RoundingPolicy::Nearest);

    let file = settings_file(&settings.to_toml().unwrap());
    assert_eq!(PluginSettings::load_from(file.path()).unwrap(), settings);
}

#[test]
fn test_logging_init_is_idempotent() {
    let config = TracingConfig::new(tracing::Level::DEBUG)
        .with_format(OutputFormat::Compact)
        .with_span_events(true);
    assert!(logging::init(config.clone()).is_ok());
    assert!(logging::init(config).is_ok());
    assert!(logging::init_from_settings(&PluginSettings::default()).is_ok());
    tracing::debug!("logging initialized twice");
}
