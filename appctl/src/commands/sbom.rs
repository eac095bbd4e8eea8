use std::io::Write as _;

use clap::{Parser, ValueEnum};
use eyre::WrapErr as _;

use crate::invocation::Invocation;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum Format {
    /// The full document.
    #[default]
    Json,
    /// Only the hash of the document.
    Hash,
}

/// Print the software bill of materials of an instance
#[derive(Debug, Parser)]
pub struct Sbom {
    #[arg(long, value_enum, default_value_t)]
    format: Format,
}

impl Sbom {
    pub async fn run(self, invocation: &Invocation) -> eyre::Result<()> {
        let instance = invocation.open_instance()?;
        let config = instance.load_config()?;
        let sbom = appliance_update::sbom::Sbom::generate(
            &config,
            instance.dir(),
            &instance.build_dir(),
        )
        .wrap_err("failed to generate the SBOM")?
        .render();
        let mut stdout = std::io::stdout().lock();
        match self.format {
            Format::Json => stdout.write_all(&sbom.json)?,
            Format::Hash => writeln!(stdout, "{}", sbom.hash)?,
        }
        Ok(())
    }
}
