use appliance_update::tls;
use clap::{Parser, Subcommand};
use eyre::WrapErr as _;

use crate::invocation::Invocation;

/// Manage the device certificate
#[derive(Debug, Parser)]
pub struct Tls {
    #[command(subcommand)]
    command: TlsCommand,
}

#[derive(Debug, Subcommand)]
enum TlsCommand {
    /// Generate a self-signed certificate and key for the device, to be
    /// embedded by the packer and pinned by later commands.
    Generate,
}

impl Tls {
    pub async fn run(self, invocation: &Invocation) -> eyre::Result<()> {
        match self.command {
            TlsCommand::Generate => {
                let instance = invocation.open_instance()?;
                let mut lock = super::lock(&instance)?;
                let _guard = lock.try_acquire()?;
                let config = instance.load_config()?;
                let host = config.update_hostname();
                let fingerprint = tls::generate_self_signed(
                    host,
                    &instance.certificate_path(host),
                    &instance.key_path(host),
                )
                .wrap_err_with(|| format!("failed to generate a certificate for `{host}`"))?;
                println!("sha256:{fingerprint}");
                Ok(())
            }
        }
    }
}
