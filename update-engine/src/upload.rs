//! Streaming artifact uploads with an end-to-end digest check.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use appliance_update_core::{Artifact, HashAlgorithm, features::UPDATE_HASH_HEADER};
use bytes::Bytes;
use futures::{Stream, StreamExt as _};
use reqwest::{Body, Method, StatusCode, header::CONTENT_TYPE};
use sha2::{Digest as _, Sha256};
use tokio::{sync::oneshot, time::MissedTickBehavior};
use tokio_util::{io::ReaderStream, sync::CancellationToken, task::AbortOnDropHandle};
use tracing::{debug, info, instrument, warn};

use crate::{DeviceClient, Error, retry::retry};

/// Interval between progress reports, capping them at ten per second.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_so_far: u64,
    pub total_to_upload: u64,
}

pub type ProgressFn = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// The rolling hash a device computes over an upload body.
#[derive(Debug, Clone)]
pub enum UpdateHasher {
    Crc32(crc32fast::Hasher),
    Sha256(Sha256),
}

impl UpdateHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Crc32 => Self::Crc32(crc32fast::Hasher::new()),
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Crc32(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    /// Raw digest bytes. CRC-32 is big endian, as the device prints it.
    pub fn finalize(self) -> Vec<u8> {
        match self {
            Self::Crc32(h) => h.finalize().to_be_bytes().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
        }
    }
}

/// Uploads `artifact`, retrying transient failures from byte zero. Returns the
/// verified hex digest.
#[instrument(skip_all, fields(artifact = %artifact.name, size = artifact.size))]
pub async fn upload(
    client: &DeviceClient,
    artifact: &Artifact,
    progress: Option<ProgressFn>,
    cancel: &CancellationToken,
) -> Result<String, Error> {
    let what = format!("upload of {}", artifact.name);
    let digest = retry(
        client.settings().upload_backoff,
        cancel,
        &what,
        async || upload_once(client, artifact, progress.clone(), cancel).await,
    )
    .await?;
    info!(%digest, "uploaded {} to {}", artifact.name, artifact.destination);
    Ok(digest)
}

async fn upload_once(
    client: &DeviceClient,
    artifact: &Artifact,
    progress: Option<ProgressFn>,
    cancel: &CancellationToken,
) -> Result<String, Error> {
    let algorithm = client.features().hash_algorithm();
    let path = artifact.destination.path();
    let url = client.target().url(&path);
    let file = tokio::fs::File::open(&artifact.local_path).await.map_err(|e| {
        Error::io(
            format!("failed opening `{}`", artifact.local_path.display()),
            e,
        )
    })?;

    let sent = Arc::new(AtomicU64::new(0));
    let (digest_tx, digest_rx) = oneshot::channel();
    let body = hashing_stream(
        ReaderStream::new(file),
        UpdateHasher::new(algorithm),
        digest_tx,
        Arc::clone(&sent),
        artifact.size,
    );

    let method = if artifact.destination.is_staging() {
        Method::PUT
    } else {
        Method::POST
    };
    let builder = client
        .request(method, &path)
        .header(UPDATE_HASH_HEADER, algorithm.as_str())
        .header(CONTENT_TYPE, "application/octet-stream")
        .body(Body::wrap_stream(body));

    let done = CancellationToken::new();
    let reporter = progress.map(|report| {
        AbortOnDropHandle::new(tokio::spawn(report_progress(
            report,
            Arc::clone(&sent),
            artifact.size,
            done.clone(),
        )))
    });

    debug!(%algorithm, %url, "streaming artifact");
    let response = client.send(builder, &url, cancel).await?;
    let response = client.expect_success(response, &url).await?;
    if response.status() != StatusCode::OK {
        return Err(Error::UnexpectedStatus {
            url,
            status: response.status(),
            body: String::new(),
        });
    }
    let remote = client.read_text(response, &url, cancel).await?;
    let local = digest_rx.await.map_err(|_| Error::MalformedResponse {
        url: url.clone(),
        reason: "device answered before the body was fully sent".to_owned(),
    })?;

    let remote = remote.trim();
    let remote_bytes = hex::decode(remote).map_err(|e| Error::MalformedResponse {
        url: url.clone(),
        reason: format!("digest `{remote}` is not hex: {e}"),
    })?;
    if remote_bytes.len() != algorithm.digest_len() {
        return Err(Error::MalformedResponse {
            url,
            reason: format!("`{remote}` is not a {algorithm} digest"),
        });
    }
    if remote_bytes != local {
        let err = Error::DigestMismatch {
            artifact: artifact.name.clone(),
            local: hex::encode(&local),
            remote: remote.to_owned(),
        };
        warn!("{err}");
        return Err(err);
    }

    done.cancel();
    if let Some(reporter) = reporter {
        let _ = reporter.await;
    }
    Ok(hex::encode(local))
}

/// Wraps a chunk stream so that every chunk passes through `hasher` and counts
/// towards `sent`.
///
/// The digest is sent as soon as `len` bytes went through, since the transport
/// may stop polling once it has written a body of known size. A stream that
/// ends early still sends the digest of what it yielded.
fn hashing_stream<S>(
    chunks: S,
    hasher: UpdateHasher,
    digest_tx: oneshot::Sender<Vec<u8>>,
    sent: Arc<AtomicU64>,
    len: u64,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static
where
    S: Stream<Item = std::io::Result<Bytes>> + Send + Unpin + 'static,
{
    futures::stream::unfold(
        (chunks, Some((hasher, digest_tx)), sent),
        move |(mut chunks, mut state, sent)| async move {
            match chunks.next().await {
                Some(Ok(chunk)) => {
                    if let Some((hasher, _)) = state.as_mut() {
                        hasher.update(&chunk);
                    }
                    let total = sent.fetch_add(chunk.len() as u64, Ordering::Relaxed)
                        + chunk.len() as u64;
                    if total >= len
                        && let Some((hasher, tx)) = state.take()
                    {
                        let _ = tx.send(hasher.finalize());
                    }
                    Some((Ok(chunk), (chunks, state, sent)))
                }
                // The digest of a failed read is meaningless.
                Some(Err(e)) => Some((Err(e), (chunks, None, sent))),
                None => {
                    if let Some((hasher, tx)) = state.take() {
                        let _ = tx.send(hasher.finalize());
                    }
                    None
                }
            }
        },
    )
}

async fn report_progress(
    report: ProgressFn,
    sent: Arc<AtomicU64>,
    total: u64,
    done: CancellationToken,
) {
    let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            () = done.cancelled() => {
                // Keep the final report on the same cadence.
                interval.tick().await;
                report(UploadProgress {
                    bytes_so_far: total,
                    total_to_upload: total,
                });
                return;
            }
        }
        report(UploadProgress {
            bytes_so_far: sent.load(Ordering::Relaxed).min(total),
            total_to_upload: total,
        });
    }
}
