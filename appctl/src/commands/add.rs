use appliance_update::PackageSource;
use clap::Parser;
use eyre::WrapErr as _;

use crate::invocation::Invocation;

/// Add packages to an instance
///
/// Each package is an import path, optionally pinned as `import/path@version`,
/// or a local directory containing a `go.mod`.
#[derive(Debug, Parser)]
pub struct Add {
    #[arg(required = true)]
    packages: Vec<String>,
}

impl Add {
    pub async fn run(self, invocation: &Invocation) -> eyre::Result<()> {
        let instance = invocation.open_instance()?;
        let mut lock = super::lock(&instance)?;
        let _guard = lock.try_acquire()?;
        for package in &self.packages {
            let source = PackageSource::parse(package)?;
            let module_dir = instance
                .add_package(&source)
                .wrap_err_with(|| format!("failed to add `{package}`"))?;
            println!("{} {}", source.import_path(), module_dir.display());
        }
        Ok(())
    }
}
