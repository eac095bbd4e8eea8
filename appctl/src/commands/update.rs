use appliance_update::Orchestrator;
use appliance_update_core::UpdatePlan;
use clap::Parser;
use eyre::WrapErr as _;
use tracing::info;

use super::Images;
use crate::{invocation::Invocation, progress::upload_progress};

/// Build the instance and update the device over the network
///
/// Uploads the new root, boot and MBR to the inactive partitions, switches to
/// them, reboots and commits once the device runs the new build.
#[derive(Debug, Parser)]
pub struct Update {
    /// Testboot the new root instead of switching to it for good.
    #[arg(long)]
    pub testboot: bool,
    #[command(flatten)]
    images: Images,
}

impl Update {
    pub async fn run(self, invocation: &Invocation) -> eyre::Result<()> {
        let instance = invocation.open_instance()?;
        let mut lock = super::lock(&instance)?;
        let _guard = lock.try_acquire()?;

        let packed = self.images.get(invocation, &instance, None).await?;
        let client = invocation.connect(&instance).await?;
        let plan = UpdatePlan::for_update(&packed, client.features(), invocation.testboot)
            .wrap_err("failed to plan the update")?;
        let report = Orchestrator::new(&client)
            .with_progress(upload_progress())
            .run(&plan, &invocation.cancel)
            .await
            .wrap_err_with(|| format!("failed to update `{}`", client.target().host()))?;

        for (artifact, digest) in &report.digests {
            info!(artifact, digest, "verified");
        }
        if let Some(status) = &report.status {
            println!("{} now runs {}", client.target().host(), status.build_timestamp);
        }
        Ok(())
    }
}
