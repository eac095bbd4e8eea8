use appliance_update::orchestrator;
use clap::Parser;
use eyre::WrapErr as _;

use crate::invocation::Invocation;

/// Reboot the device
#[derive(Debug, Parser)]
pub struct Reboot {}

impl Reboot {
    pub async fn run(self, invocation: &Invocation) -> eyre::Result<()> {
        let instance = invocation.open_instance()?;
        let mut lock = super::lock(&instance)?;
        let _guard = lock.try_acquire()?;

        let client = invocation.connect(&instance).await?;
        orchestrator::reboot(&client, &invocation.cancel)
            .await
            .wrap_err_with(|| format!("failed to reboot `{}`", client.target().host()))
    }
}
