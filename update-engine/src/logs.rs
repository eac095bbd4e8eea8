//! Following the stdout and stderr of one service over Server-Sent Events.

use std::fmt::Display;

use futures::StreamExt as _;
use reqwest::{Method, StatusCode, header::ACCEPT};
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{DeviceClient, Error};

pub const LOG_PATH: &str = "/log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}

impl Display for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub stream: LogStream,
    pub line: String,
}

/// Follows both streams of `service`, forwarding every event to `lines`.
///
/// Returns once both streams ended or `cancel` fired. A stream that keeps
/// failing at the transport level is given up without affecting its peer; a
/// protocol error, such as an unknown service, stops both.
pub async fn tail(
    client: &DeviceClient,
    service: &str,
    lines: mpsc::Sender<LogLine>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let group = cancel.child_token();
    let mut tasks = JoinSet::new();
    for stream in [LogStream::Stdout, LogStream::Stderr] {
        tasks.spawn(follow(
            client.clone(),
            service.to_owned(),
            stream,
            lines.clone(),
            group.clone(),
        ));
    }
    drop(lines);

    let mut result = Ok(());
    while let Some(joined) = tasks.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(Error::Cancelled),
        };
        if let Err(err) = outcome {
            group.cancel();
            if result.is_ok() {
                result = Err(err);
            }
        }
    }

    match result {
        Err(Error::Cancelled) if cancel.is_cancelled() => Ok(()),
        other => other,
    }
}

async fn follow(
    client: DeviceClient,
    service: String,
    stream: LogStream,
    lines: mpsc::Sender<LogLine>,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let settings = client.settings().clone();
    let mut failures = 0;
    loop {
        let mut connected = false;
        match subscribe(&client, &service, stream, &lines, &mut connected, &cancel).await {
            Ok(()) => {
                debug!(%stream, "log stream ended");
                return Ok(());
            }
            Err(_) if cancel.is_cancelled() => return Ok(()),
            Err(err) if err.is_transient() => {
                if connected {
                    failures = 0;
                }
                if failures >= settings.log_reconnects {
                    warn!(%stream, "giving up on log stream: {err}");
                    return Ok(());
                }
                failures += 1;
                warn!(%stream, attempt = failures, "log stream interrupted, reconnecting: {err}");
                tokio::select! {
                    () = cancel.cancelled() => return Ok(()),
                    () = tokio::time::sleep(settings.log_reconnect_delay) => {}
                }
            }
            Err(err) => return Err(err),
        }
    }
}

async fn subscribe(
    client: &DeviceClient,
    service: &str,
    stream: LogStream,
    lines: &mpsc::Sender<LogLine>,
    connected: &mut bool,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let url = client.target().url(LOG_PATH);
    let builder = client
        .request(Method::GET, LOG_PATH)
        .query(&[("path", format!("/user/{service}")), ("stream", stream.to_string())])
        .header(ACCEPT, "text/event-stream");
    let response = client.send(builder, &url, cancel).await?;
    if response.status() == StatusCode::NOT_FOUND {
        return Err(Error::ServiceNotFound(service.to_owned()));
    }
    let response = client.expect_success(response, &url).await?;
    *connected = true;
    info!(%stream, service, "following log stream");

    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::default();
    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            chunk = body.next() => chunk,
        };
        let bytes = match chunk {
            None => return Ok(()),
            Some(Err(source)) => return Err(Error::Transport { url, source }),
            Some(Ok(bytes)) => bytes,
        };
        for line in decoder.push(&bytes) {
            if lines.send(LogLine { stream, line }).await.is_err() {
                // Nobody is listening anymore.
                return Ok(());
            }
        }
    }
}

/// Incremental Server-Sent Events decoder yielding `data` payloads.
///
/// Comments and fields other than `data` are skipped. Multiple `data` lines of
/// one event are joined with newlines. An event still open at the end of the
/// stream is discarded.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Option<String>,
}

impl SseDecoder {
    /// Feeds `bytes` and returns the payloads of every event they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw[..end]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if line.is_empty() {
                events.extend(self.data.take());
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = line.split_once(':').unwrap_or((line, ""));
            if field != "data" {
                continue;
            }
            let value = value.strip_prefix(' ').unwrap_or(value);
            match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_owned()),
            }
        }
        events
    }
}
