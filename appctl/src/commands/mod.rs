mod add;
mod logs;
mod new;
mod overwrite;
mod push;
mod reboot;
mod run;
mod sbom;
mod tls;
mod update;

pub use self::add::Add;
pub use self::logs::Logs;
pub use self::new::New;
pub use self::overwrite::Overwrite;
pub use self::push::Push;
pub use self::reboot::Reboot;
pub use self::run::Run;
pub use self::sbom::Sbom;
pub use self::tls::Tls;
pub use self::update::Update;

use appliance_update::{Instance, InstanceLock};
use eyre::WrapErr as _;

/// Opens the lock of `instance`. Verbs that mutate the instance or the device
/// hold its guard until they return.
fn lock(instance: &Instance) -> eyre::Result<InstanceLock> {
    InstanceLock::open(instance)
        .wrap_err_with(|| format!("failed to open the lock of `{}`", instance.name()))
}

/// Where the images of a verb come from.
#[derive(Debug, clap::Args)]
struct Images {
    /// Use the images a packer left in this directory instead of building.
    #[arg(long, value_name = "DIR")]
    packed: Option<std::path::PathBuf>,
}

impl Images {
    async fn get(
        &self,
        invocation: &crate::invocation::Invocation,
        instance: &Instance,
        overwrite: Option<&std::path::Path>,
    ) -> eyre::Result<appliance_update_core::PackedImage> {
        match &self.packed {
            Some(dir) => crate::toolchain::read_packed(dir),
            None => invocation.build(instance, overwrite).await,
        }
    }
}
