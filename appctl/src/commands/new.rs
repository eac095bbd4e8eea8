use appliance_update::Instance;
use appliance_update_core::InstanceConfig;
use clap::Parser;
use eyre::WrapErr as _;

use crate::invocation::Invocation;

/// Create a new instance directory
#[derive(Debug, Parser)]
pub struct New {
    /// Create the instance without any packages, not even the default ones.
    #[arg(long)]
    empty: bool,
    /// Hostname of the device. Defaults to the instance name.
    #[arg(long)]
    hostname: Option<String>,
}

impl New {
    pub async fn run(self, invocation: &Invocation) -> eyre::Result<()> {
        let hostname = self
            .hostname
            .unwrap_or_else(|| invocation.instance.clone());
        let config = InstanceConfig::new(hostname, self.empty);
        let instance = Instance::create(&invocation.parent_dir, &invocation.instance, &config)
            .wrap_err_with(|| format!("failed to create instance `{}`", invocation.instance))?;
        println!("{}", instance.dir().display());
        Ok(())
    }
}
