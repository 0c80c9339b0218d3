//! Installs the global subscriber once and checks the JSON lines file output.
//!
//! Kept as the only test in this binary since a process has one global
//! subscriber.

use keeplog_logging::{FileConfig, LogConfig, RotationStrategy, SubscriberBuilder};
use tempfile::TempDir;

#[test]
fn test_file_output_is_json_lines() {
    let dir = TempDir::new().unwrap();
    let mut config = LogConfig::default().with_target("file_output", "debug");
    config.default_level = "warn".into();
    config.console.enabled = false;
    config.file = Some(FileConfig {
        directory: dir.path().to_path_buf(),
        prefix: "store".into(),
        rotation: RotationStrategy::Never,
        max_files: None,
    });

    let guard = SubscriberBuilder::new()
        .with_config(config)
        .with_env_override(false)
        .try_init()
        .unwrap()
        .expect("file output returns a guard");

    tracing::debug!(added = 7, "Admitted entry");
    tracing::trace!("below the target level");
    drop(guard);

    let text = std::fs::read_to_string(dir.path().join("store.log")).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["level"], "DEBUG");
    assert_eq!(lines[0]["message"], "Admitted entry");
    assert_eq!(lines[0]["added"], 7);

    // A second global subscriber is refused
    assert!(SubscriberBuilder::new().with_console(false).try_init().is_err());
}
