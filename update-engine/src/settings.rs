use std::time::Duration;

use crate::retry::Backoff;

/// Tunables of the engine. The CLI fills these from its own settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Timeout of short control requests (probe, switch, commit, status).
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// How long to wait for a reply to the reboot request. Devices often go
    /// away before answering.
    pub reboot_request_timeout: Duration,
    /// How long the device may take to come back after a reboot.
    pub reboot_window: Duration,
    pub poll_interval: Duration,
    pub upload_backoff: Backoff,
    /// Backoff for switch, testboot and commit.
    pub idempotent_backoff: Backoff,
    /// Consecutive reconnects of one log stream before it is given up.
    pub log_reconnects: u32,
    pub log_reconnect_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            reboot_request_timeout: Duration::from_secs(5),
            reboot_window: Duration::from_secs(180),
            poll_interval: Duration::from_secs(1),
            upload_backoff: Backoff::default(),
            idempotent_backoff: Backoff::default(),
            log_reconnects: 5,
            log_reconnect_delay: Duration::from_secs(1),
        }
    }
}
