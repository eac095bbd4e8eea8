use std::path::PathBuf;

use appliance_update::divert;
use clap::Parser;
use eyre::{WrapErr as _, eyre};

use crate::{invocation::Invocation, progress::upload_progress};

/// Run a locally built binary in place of a service until the next reboot
#[derive(Debug, Parser)]
pub struct Run {
    /// The binary to run.
    binary: PathBuf,
    /// The service to replace. Defaults to the binary's file name.
    #[arg(long)]
    service: Option<String>,
}

impl Run {
    pub async fn run(self, invocation: &Invocation) -> eyre::Result<()> {
        let service = match self.service {
            Some(service) => service,
            None => self
                .binary
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| eyre!("`{}` has no file name", self.binary.display()))?,
        };
        let instance = invocation.open_instance()?;
        let mut lock = super::lock(&instance)?;
        let _guard = lock.try_acquire()?;

        let client = invocation.connect(&instance).await?;
        divert::divert(
            &client,
            &service,
            &self.binary,
            Some(upload_progress()),
            &invocation.cancel,
        )
        .await
        .wrap_err_with(|| format!("failed to divert `{service}`"))?;
        println!("/user/{service} now runs {}", self.binary.display());
        Ok(())
    }
}
