//! The shipped configuration file must load and describe the defaults.

use cap_control::{CapConfig, CapCommand};
use std::path::PathBuf;

fn shipped_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config").join("cap.toml")
}

#[test]
fn test_shipped_config_loads() {
    let config = CapConfig::load_from(shipped_config()).expect("config/cap.toml should load");

    assert_eq!(config.watch_dir, PathBuf::from("temp"));
    assert_eq!(config.command_file, "command.in");
    assert_eq!(config.poll_interval_ms, 1000);
    assert!(config.archive_dir.is_none());
    assert_eq!(config.commands, cap_control::CommandTable::default());
}

#[test]
fn test_shipped_config_builds_commands() {
    let config = CapConfig::load_from(shipped_config()).unwrap();
    let cmd = CapCommand::Initialize.build(&config).unwrap();
    assert_eq!(cmd.text(), "xx xtalcheck initialize");
    assert_eq!(cmd.timeout().as_secs(), config.default_timeout_secs);
}
