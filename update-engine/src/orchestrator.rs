//! Sequencing of an over-the-network update.

use std::fmt::Display;

use appliance_update_core::{DeviceStatus, TerminalAction, UpdatePlan};
use reqwest::{Method, StatusCode};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    DeviceClient, Error, ErrorKind, divert,
    retry::retry,
    upload::{ProgressFn, upload},
};

pub const SWITCH_PATH: &str = "/update/switch";
pub const TESTBOOT_PATH: &str = "/update/testboot";
pub const COMMIT_PATH: &str = "/update/commit";
pub const REBOOT_PATH: &str = "/reboot";

/// Progress of one update.
///
/// ```text
/// Idle -> Probed -> Uploading -> Switched -> Rebooting -> Committed
///                       |            |           |
///                     Failed       Failed    RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    Probed,
    Uploading,
    Switched,
    Rebooting,
    Committed,
    Failed,
    RolledBack,
}

impl Display for UpdateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UpdateState::Idle => "idle",
            UpdateState::Probed => "probed",
            UpdateState::Uploading => "uploading",
            UpdateState::Switched => "switched",
            UpdateState::Rebooting => "rebooting",
            UpdateState::Committed => "committed",
            UpdateState::Failed => "failed",
            UpdateState::RolledBack => "rolled-back",
        };
        f.write_str(s)
    }
}

/// What a completed plan did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub state: UpdateState,
    /// Verified digest per artifact name, in upload order.
    pub digests: Vec<(String, String)>,
    /// The status the device announced after coming back, for updates.
    pub status: Option<DeviceStatus>,
}

/// Drives plans against one probed device.
pub struct Orchestrator<'a> {
    client: &'a DeviceClient,
    progress: Option<ProgressFn>,
    state: UpdateState,
}

impl std::fmt::Debug for Orchestrator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("client", self.client)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<'a> Orchestrator<'a> {
    pub fn new(client: &'a DeviceClient) -> Self {
        Self {
            client,
            progress: None,
            state: UpdateState::Idle,
        }
    }

    /// Reports upload progress of every artifact to `progress`.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    fn transition(&mut self, to: UpdateState) {
        info!(from = %self.state, %to, "update state changed");
        self.state = to;
    }

    /// Uploads every artifact of `plan` in order, then carries out its
    /// terminal action.
    #[instrument(skip_all, fields(host = self.client.target().host()))]
    pub async fn run(
        &mut self,
        plan: &UpdatePlan,
        cancel: &CancellationToken,
    ) -> Result<UpdateReport, Error> {
        // Connecting probed the device already.
        self.transition(UpdateState::Probed);
        let result = self.execute(plan, cancel).await;
        if result.is_err() && self.state != UpdateState::RolledBack {
            self.transition(UpdateState::Failed);
        }
        result
    }

    async fn execute(
        &mut self,
        plan: &UpdatePlan,
        cancel: &CancellationToken,
    ) -> Result<UpdateReport, Error> {
        match &plan.action {
            TerminalAction::SwitchTestbootCommit {
                expected_build_timestamp,
                testboot,
            } => {
                self.update(plan, expected_build_timestamp.as_deref(), *testboot, cancel)
                    .await
            }
            TerminalAction::Divert { service } => {
                let digests = self.upload_all(plan, cancel).await?;
                let staged = plan
                    .artifacts
                    .first()
                    .map(|a| a.destination.path())
                    .unwrap_or_default();
                divert::rebind(self.client, service, &staged, cancel).await?;
                Ok(UpdateReport {
                    state: self.state,
                    digests,
                    status: None,
                })
            }
            TerminalAction::None => {
                let digests = self.upload_all(plan, cancel).await?;
                Ok(UpdateReport {
                    state: self.state,
                    digests,
                    status: None,
                })
            }
        }
    }

    async fn upload_all(
        &mut self,
        plan: &UpdatePlan,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, String)>, Error> {
        self.transition(UpdateState::Uploading);
        info!(
            artifacts = plan.artifacts.len(),
            bytes = plan.total_bytes(),
            "uploading"
        );
        let mut digests = Vec::with_capacity(plan.artifacts.len());
        // Strictly sequential; a failure stops the plan before any switch.
        for artifact in &plan.artifacts {
            let digest = upload(self.client, artifact, self.progress.clone(), cancel).await?;
            digests.push((artifact.name.clone(), digest));
        }
        Ok(digests)
    }

    async fn update(
        &mut self,
        plan: &UpdatePlan,
        expected_build_timestamp: Option<&str>,
        testboot: bool,
        cancel: &CancellationToken,
    ) -> Result<UpdateReport, Error> {
        let settings = self.client.settings().clone();
        let previous = retry(settings.idempotent_backoff, cancel, "status", async || {
            self.client.status(cancel).await
        })
        .await?;
        match previous.boot_selector {
            Some(selector) => info!(
                build = %previous.build_timestamp,
                active = %selector.active,
                inactive = %selector.inactive(),
                "device status before update"
            ),
            None => info!(build = %previous.build_timestamp, "device status before update"),
        }

        let digests = self.upload_all(plan, cancel).await?;

        let (path, what) = if testboot {
            (TESTBOOT_PATH, "testboot")
        } else {
            (SWITCH_PATH, "switch")
        };
        retry(settings.idempotent_backoff, cancel, what, async || {
            self.client.post_empty(path, cancel).await
        })
        .await?;
        self.transition(UpdateState::Switched);

        let after_switch = async {
            self.transition(UpdateState::Rebooting);
            reboot(self.client, cancel).await?;
            let status =
                wait_for_new_build(self.client, &previous, expected_build_timestamp, cancel)
                    .await?;
            retry(settings.idempotent_backoff, cancel, "commit", async || {
                self.client.post_empty(COMMIT_PATH, cancel).await
            })
            .await?;
            Ok::<_, Error>(status)
        };
        let status = match after_switch.await {
            Ok(status) => status,
            Err(Error::Cancelled) => return Err(Error::CancelledInTestboot),
            Err(err) => {
                if err.kind() == ErrorKind::RolledBack {
                    self.transition(UpdateState::RolledBack);
                }
                return Err(err);
            }
        };
        self.transition(UpdateState::Committed);
        Ok(UpdateReport {
            state: self.state,
            digests,
            status: Some(status),
        })
    }
}

/// Asks the device to reboot. Never retried.
///
/// Devices regularly go away before answering, so transport failures and
/// timeouts count as success. Only a rejected credential is an error.
#[instrument(skip_all, fields(host = client.target().host()))]
pub async fn reboot(client: &DeviceClient, cancel: &CancellationToken) -> Result<(), Error> {
    let url = client.target().url(REBOOT_PATH);
    let builder = client
        .request(Method::POST, REBOOT_PATH)
        .timeout(client.settings().reboot_request_timeout);
    match client.send(builder, &url, cancel).await {
        Ok(response) => match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(Error::AuthRejected {
                    url,
                    status: response.status(),
                });
            }
            status if !status.is_success() => {
                warn!(%status, "reboot request answered with an error, continuing");
            }
            _ => debug!("reboot request acknowledged"),
        },
        Err(Error::Transport { source, .. }) => {
            debug!("no response to reboot request: {source}");
        }
        Err(err) => return Err(err),
    }
    info!("device is rebooting");
    Ok(())
}

/// Polls the status document until the device runs a build other than
/// `previous` from the other root.
///
/// The device is considered rolled back when it comes back on the previous
/// root, or reappears with the old build after having gone away, or still
/// answers with the old build when the reboot window closes. A new build
/// other than `expected` is still committed.
pub async fn wait_for_new_build(
    client: &DeviceClient,
    previous: &DeviceStatus,
    expected: Option<&str>,
    cancel: &CancellationToken,
) -> Result<DeviceStatus, Error> {
    let settings = client.settings();
    let deadline = Instant::now() + settings.reboot_window;
    let mut went_away = false;
    let mut last_seen: Option<DeviceStatus> = None;

    loop {
        tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            () = tokio::time::sleep(settings.poll_interval) => {}
        }

        match client.status(cancel).await {
            Ok(status) => {
                let is_new = status.build_timestamp != previous.build_timestamp;
                let same_root = previous.active_root().is_some()
                    && status.active_root() == previous.active_root();
                if is_new && !same_root {
                    if let Some(expected) = expected
                        && status.build_timestamp != expected
                    {
                        warn!(
                            build = %status.build_timestamp,
                            expected,
                            "device came back with a build other than the one uploaded"
                        );
                    }
                    info!(build = %status.build_timestamp, "device came back with the new build");
                    return Ok(status);
                }
                if is_new || went_away {
                    return Err(rolled_back(status));
                }
                debug!(build = %status.build_timestamp, "device still on the old build");
                last_seen = Some(status);
            }
            Err(err @ (Error::Cancelled | Error::AuthRejected { .. })) => return Err(err),
            Err(err) => {
                debug!("device not reachable yet: {err}");
                went_away = true;
            }
        }

        if Instant::now() >= deadline {
            return Err(match last_seen {
                Some(status) => rolled_back(status),
                None => Error::RebootTimeout(settings.reboot_window),
            });
        }
    }
}

fn rolled_back(status: DeviceStatus) -> Error {
    let err = Error::RolledBack {
        active: status.active_root(),
        build_timestamp: status.build_timestamp,
    };
    warn!("{err}");
    err
}
