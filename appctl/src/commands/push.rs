use appliance_update::{
    push::{PushClient, build_archive},
    sbom::Sbom,
};
use clap::Parser;
use eyre::{WrapErr as _, eyre};
use url::Url;

use super::Images;
use crate::invocation::Invocation;

/// Bundle the images and their SBOM and push them to an update server
///
/// The bearer token is read from the `push_token` setting, for example the
/// `APPCTL_PUSH_TOKEN` environment variable.
#[derive(Debug, Parser)]
pub struct Push {
    /// The update server. Defaults to the `push_server` setting.
    #[arg(long)]
    server: Option<Url>,
    #[command(flatten)]
    images: Images,
}

impl Push {
    pub async fn run(self, invocation: &Invocation) -> eyre::Result<()> {
        let settings = &invocation.settings;
        let server = self
            .server
            .or_else(|| settings.push_server.clone())
            .ok_or_else(|| eyre!("no update server given; pass --server or set push_server"))?;
        let token = settings
            .push_token
            .clone()
            .ok_or_else(|| eyre!("no push token configured; set APPCTL_PUSH_TOKEN"))?;

        let instance = invocation.open_instance()?;
        let mut lock = super::lock(&instance)?;
        let _guard = lock.try_acquire()?;
        let packed = self.images.get(invocation, &instance, None).await?;
        let config = instance.load_config()?;
        let sbom = Sbom::generate(&config, instance.dir(), &instance.build_dir())
            .wrap_err("failed to generate the SBOM")?
            .render();

        let scratch = tempfile::tempdir().wrap_err("failed creating a scratch directory")?;
        let archive = scratch.path().join("push.tar.gz");
        build_archive(&packed, &sbom, &archive).wrap_err("failed to build the push archive")?;

        let client = PushClient::new(&server, token, settings.engine().connect_timeout)?;
        let reply = client
            .push(&archive, &invocation.cancel)
            .await
            .wrap_err_with(|| format!("failed to push to `{}`", client.endpoint()))?;
        println!("{}", serde_json::to_string_pretty(&reply)?);
        Ok(())
    }
}
