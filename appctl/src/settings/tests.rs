// Each test uses its own environment prefix; env vars set in one jail are
// visible to tests running concurrently.

use std::{path::Path, time::Duration};

use clap::Parser;
use figment::Jail;
use secrecy::ExposeSecret as _;

use super::{Args, Settings};

#[derive(Debug, Parser)]
struct TestCli {
    #[command(flatten)]
    args: Args,
}

fn make_args(args: &str) -> Args {
    TestCli::try_parse_from(str::split_ascii_whitespace(args))
        .unwrap()
        .args
}

const CFG_FILE_CONTENTS: &str = r#"
    parent_dir = "/config/appliances"
    request_timeout = 1000
    reboot_window = 60000
    poll_interval = 500
    upload_attempts = 5
    packer = "/config/packer"
    go = "/config/go"
    push_server = "https://updates.example.com/fleet"
    push_token = "from-config"
"#;

#[test]
fn defaults_apply_without_any_source() {
    Jail::expect_with(|_jail| {
        let settings = Settings::get(&make_args("appctl"), "missing.toml", "appctl_none_")?;
        let defaults = Settings::default();
        assert_eq!(settings.parent_dir, defaults.parent_dir);
        assert_eq!(settings.reboot_window, Duration::from_secs(180));
        assert_eq!(settings.upload_attempts, 3);
        assert_eq!(settings.go, Path::new("go"));
        assert!(settings.push_server.is_none());
        assert!(settings.push_token.is_none());
        Ok(())
    });
}

#[test]
fn config_file_overrides_defaults() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", CFG_FILE_CONTENTS)?;
        let settings = Settings::get(&make_args("appctl"), "config.toml", "appctl_file_")?;
        assert_eq!(settings.parent_dir, Path::new("/config/appliances"));
        assert_eq!(settings.request_timeout, Duration::from_secs(1));
        assert_eq!(settings.reboot_window, Duration::from_secs(60));
        assert_eq!(settings.poll_interval, Duration::from_millis(500));
        assert_eq!(settings.upload_attempts, 5);
        assert_eq!(settings.packer, Path::new("/config/packer"));
        assert_eq!(
            settings.push_server.as_ref().map(|u| u.as_str()),
            Some("https://updates.example.com/fleet")
        );
        assert_eq!(
            settings.push_token.as_ref().map(|t| t.expose_secret().as_str()),
            Some("from-config")
        );
        Ok(())
    });
}

#[test]
fn env_vars_override_config_file() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", CFG_FILE_CONTENTS)?;
        jail.set_env("appctl_env_parent_dir", "/env/appliances");
        jail.set_env("appctl_env_reboot_window", "4000");
        jail.set_env("appctl_env_push_token", "from-env");
        let settings = Settings::get(&make_args("appctl"), "config.toml", "appctl_env_")?;
        assert_eq!(settings.parent_dir, Path::new("/env/appliances"));
        assert_eq!(settings.reboot_window, Duration::from_secs(4));
        // Untouched by the environment.
        assert_eq!(settings.upload_attempts, 5);
        assert_eq!(
            settings.push_token.as_ref().map(|t| t.expose_secret().as_str()),
            Some("from-env")
        );
        Ok(())
    });
}

#[test]
fn cli_args_override_config_file_and_env_vars() {
    const CLI_ARGS: &str = r#"
    appctl
        --parent-dir /args/appliances
        --request-timeout 2000
        --reboot-window 5000
        --poll-interval 100
        --upload-attempts 1
        --packer /args/packer
        --go /args/go
    "#;

    Jail::expect_with(|jail| {
        jail.create_file("config.toml", CFG_FILE_CONTENTS)?;
        jail.set_env("appctl_args_parent_dir", "/env/appliances");
        jail.set_env("appctl_args_go", "/env/go");
        let settings = Settings::get(&make_args(CLI_ARGS), "config.toml", "appctl_args_")?;
        assert_eq!(settings.parent_dir, Path::new("/args/appliances"));
        assert_eq!(settings.request_timeout, Duration::from_secs(2));
        assert_eq!(settings.reboot_window, Duration::from_secs(5));
        assert_eq!(settings.poll_interval, Duration::from_millis(100));
        assert_eq!(settings.upload_attempts, 1);
        assert_eq!(settings.packer, Path::new("/args/packer"));
        assert_eq!(settings.go, Path::new("/args/go"));
        // Not settable on the command line.
        assert!(settings.push_server.is_some());
        Ok(())
    });
}

#[test]
fn engine_settings_follow_tool_settings() {
    Jail::expect_with(|jail| {
        jail.create_file("config.toml", CFG_FILE_CONTENTS)?;
        let engine = Settings::get(&make_args("appctl"), "config.toml", "appctl_engine_")?.engine();
        assert_eq!(engine.request_timeout, Duration::from_secs(1));
        assert_eq!(engine.reboot_window, Duration::from_secs(60));
        assert_eq!(engine.upload_backoff.attempts, 5);
        Ok(())
    });
}
