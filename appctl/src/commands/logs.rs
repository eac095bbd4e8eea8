use std::io::Write as _;

use appliance_update::logs::{LogLine, LogStream, tail};
use clap::Parser;
use eyre::WrapErr as _;
use tokio::sync::mpsc;

use crate::invocation::Invocation;

/// Follow the stdout and stderr of a service
#[derive(Debug, Parser)]
pub struct Logs {
    /// The service to follow, as named below `/user`.
    service: String,
}

impl Logs {
    pub async fn run(self, invocation: &Invocation) -> eyre::Result<()> {
        let instance = invocation.open_instance()?;
        let client = invocation.connect(&instance).await?;

        let (tx, mut rx) = mpsc::channel::<LogLine>(64);
        let printer = tokio::task::spawn_blocking(move || {
            let stdout = std::io::stdout();
            let stderr = std::io::stderr();
            while let Some(LogLine { stream, line }) = rx.blocking_recv() {
                // A closed pipe ends the tail like a cancellation would.
                let written = match stream {
                    LogStream::Stdout => writeln!(stdout.lock(), "{line}"),
                    LogStream::Stderr => writeln!(stderr.lock(), "{line}"),
                };
                if written.is_err() {
                    break;
                }
            }
        });

        tail(&client, &self.service, tx, &invocation.cancel)
            .await
            .wrap_err_with(|| format!("failed to follow the logs of `{}`", self.service))?;
        printer.await.wrap_err("log printer panicked")?;
        Ok(())
    }
}
