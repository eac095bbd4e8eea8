//! Running one developer supplied binary in place of a service.

use std::path::Path;

use appliance_update_core::UpdatePlan;
use reqwest::{Method, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::{
    DeviceClient, Error, Orchestrator, orchestrator::UpdateReport, retry::retry,
    upload::ProgressFn,
};

pub const DIVERT_PATH: &str = "/divert";

/// Stages `binary` on the device and restarts `service` from it.
///
/// The staging tag is the service name, so diverting again replaces the
/// previous binary. The boot selector is untouched and a reboot undoes the
/// diversion.
pub async fn divert(
    client: &DeviceClient,
    service: &str,
    binary: &Path,
    progress: Option<ProgressFn>,
    cancel: &CancellationToken,
) -> Result<UpdateReport, Error> {
    if !client.features().divert {
        return Err(Error::Unsupported("divert"));
    }
    let plan = UpdatePlan::for_divert(service, binary)
        .map_err(|e| Error::io(format!("failed reading `{}`", binary.display()), e))?;
    let mut orchestrator = Orchestrator::new(client);
    if let Some(progress) = progress {
        orchestrator = orchestrator.with_progress(progress);
    }
    orchestrator.run(&plan, cancel).await
}

/// Points `/user/<service>` at the staged blob at `staged`.
#[instrument(skip(client, cancel), fields(host = client.target().host()))]
pub async fn rebind(
    client: &DeviceClient,
    service: &str,
    staged: &str,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let url = client.target().url(DIVERT_PATH);
    let service_path = format!("/user/{service}");
    retry(client.settings().idempotent_backoff, cancel, "divert", async || {
        let builder = client
            .request(Method::POST, DIVERT_PATH)
            .timeout(client.settings().request_timeout)
            .form(&[("path", service_path.as_str()), ("diversion", staged)]);
        let response = client.send(builder, &url, cancel).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::ServiceNotFound(service.to_owned()));
        }
        client.expect_success(response, &url).await.map(drop)
    })
    .await?;
    info!("{service_path} now runs {staged}");
    Ok(())
}
