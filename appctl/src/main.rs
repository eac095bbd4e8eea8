#![forbid(unsafe_code)]

mod commands;
mod exit_status;
mod invocation;
mod logging;
mod progress;
mod settings;
mod toolchain;

use clap::{Parser, Subcommand};
use eyre::WrapErr as _;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::{
    exit_status::ExitStatus,
    invocation::Invocation,
    settings::{Args, ENV_VAR_PREFIX, Settings, config_source},
};

/// Control plane for appliances that run a handful of services from one
/// image: build and write images, update devices over the network, run a
/// development binary in place of a service and follow service logs.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// The instance to operate on.
    #[arg(short, long, global = true, default_value = "hello")]
    instance: String,
    /// Trust the device certificate on first use and record it.
    #[arg(long, global = true)]
    insecure: bool,
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(flatten)]
    args: Args,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    New(commands::New),
    Add(commands::Add),
    Overwrite(commands::Overwrite),
    Update(commands::Update),
    Reboot(commands::Reboot),
    Run(commands::Run),
    Logs(commands::Logs),
    Push(commands::Push),
    Sbom(commands::Sbom),
    Tls(commands::Tls),
}

#[tokio::main]
async fn main() -> ExitStatus {
    if let Err(err) = color_eyre::install() {
        eprintln!("failed to install error reporting: {err}");
    }
    let cli = Cli::parse();
    if let Err(err) = logging::init(cli.verbose) {
        eprintln!("failed to initialize logging: {err}");
    }

    match run(cli).await {
        Ok(()) => ExitStatus::Success,
        Err(err) => {
            let status = ExitStatus::from(&err);
            if status == ExitStatus::Cancelled {
                warn!("{err:#}");
            } else {
                error!("{err:?}");
            }
            status
        }
    }
}

async fn run(cli: Cli) -> eyre::Result<()> {
    let settings = Settings::get(&cli.args, config_source(&cli.args), ENV_VAR_PREFIX)
        .wrap_err("failed to load settings")?;

    let cancel = CancellationToken::new();
    let _ctrl_c = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling");
                cancel.cancel();
            }
        }
    });

    let testboot = matches!(&cli.command, Command::Update(update) if update.testboot);
    let invocation = Invocation {
        instance: cli.instance,
        parent_dir: settings.parent_dir.clone(),
        insecure: cli.insecure,
        testboot,
        settings,
        cancel,
    };

    match cli.command {
        Command::New(cmd) => cmd.run(&invocation).await,
        Command::Add(cmd) => cmd.run(&invocation).await,
        Command::Overwrite(cmd) => cmd.run(&invocation).await,
        Command::Update(cmd) => cmd.run(&invocation).await,
        Command::Reboot(cmd) => cmd.run(&invocation).await,
        Command::Run(cmd) => cmd.run(&invocation).await,
        Command::Logs(cmd) => cmd.run(&invocation).await,
        Command::Push(cmd) => cmd.run(&invocation).await,
        Command::Sbom(cmd) => cmd.run(&invocation).await,
        Command::Tls(cmd) => cmd.run(&invocation).await,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn testboot_is_an_update_flag() {
        let cli = Cli::try_parse_from(["appctl", "-i", "kiosk", "update", "--testboot"]).unwrap();
        assert_eq!(cli.instance, "kiosk");
        assert!(matches!(cli.command, Command::Update(update) if update.testboot));
    }

    #[test]
    fn global_settings_args_follow_the_verb() {
        let cli =
            Cli::try_parse_from(["appctl", "logs", "hello", "--parent-dir", "/srv/appliances"])
                .unwrap();
        assert_eq!(
            cli.args.parent_dir.as_deref(),
            Some(std::path::Path::new("/srv/appliances"))
        );
    }
}
