use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    prelude::*,
};

/// Logs to stderr so stdout stays free for verb output such as service logs
/// or the SBOM. `RUST_LOG` overrides the default level.
pub fn init(verbose: bool) -> eyre::Result<()> {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let stderr_log = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(filter);
    tracing_subscriber::registry().with(stderr_log).try_init()?;
    Ok(())
}
