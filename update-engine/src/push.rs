//! Shipping a built image to a remote update server.

use std::{fs::File, path::Path, time::Duration};

use appliance_update_core::PackedImage;
use flate2::{Compression, write::GzEncoder};
use reqwest::{
    Body, Client, StatusCode,
    header::{CONTENT_LENGTH, CONTENT_TYPE},
};
use secrecy::{ExposeSecret as _, SecretString};
use tokio_util::{io::ReaderStream, sync::CancellationToken};
use tracing::{info, instrument};
use url::Url;

use crate::{Error, sbom::RenderedSbom};

pub const PUSH_PATH: &str = "api/v1/push";

const APP_USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[derive(Debug, Clone)]
pub struct PushClient {
    http: Client,
    endpoint: Url,
    token: SecretString,
}

impl PushClient {
    pub fn new(
        server: &Url,
        token: SecretString,
        connect_timeout: Duration,
    ) -> Result<Self, Error> {
        // A trailing slash keeps the base path when joining.
        let mut base = server.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let endpoint = base.join(PUSH_PATH).map_err(|source| Error::InvalidUrl {
            url: server.to_string(),
            source,
        })?;
        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(Error::BuildClient)?;
        Ok(Self {
            http,
            endpoint,
            token,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Uploads `archive` and returns the server's JSON reply unchanged.
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    pub async fn push(
        &self,
        archive: &Path,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, Error> {
        let url = self.endpoint.to_string();
        let file = tokio::fs::File::open(archive)
            .await
            .map_err(|e| Error::io(format!("failed opening `{}`", archive.display()), e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| Error::io(format!("failed reading `{}`", archive.display()), e))?
            .len();

        let request = self
            .http
            .put(self.endpoint.clone())
            .bearer_auth(self.token.expose_secret())
            .header(CONTENT_TYPE, "application/gzip")
            .header(CONTENT_LENGTH, len)
            .body(Body::wrap_stream(ReaderStream::new(file)));
        let response = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            response = request.send() => response.map_err(|source| Error::Transport {
                url: url.clone(),
                source,
            })?,
        };

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(Error::AuthRejected { url, status });
        }
        let body = response.text().await.map_err(|source| Error::Transport {
            url: url.clone(),
            source,
        })?;
        if status != StatusCode::OK {
            return Err(Error::UnexpectedStatus { url, status, body });
        }
        let reply = serde_json::from_str(&body).map_err(|e| Error::MalformedResponse {
            url,
            reason: e.to_string(),
        })?;
        info!(bytes = len, "pushed archive");
        Ok(reply)
    }
}

/// Bundles the packed images and the SBOM into a gzip compressed tarball.
pub fn build_archive(
    packed: &PackedImage,
    sbom: &RenderedSbom,
    out: &Path,
) -> Result<(), Error> {
    let context = || format!("failed writing `{}`", out.display());
    let file = File::create(out).map_err(|e| Error::io(context(), e))?;
    let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    let images = [
        ("boot.img", Some(&packed.boot)),
        ("root.img", Some(&packed.root)),
        ("mbr.img", packed.mbr.as_ref()),
        ("bootloader.img", packed.bootloader.as_ref()),
    ];
    for (name, path) in images {
        let Some(path) = path else { continue };
        tar.append_path_with_name(path, name)
            .map_err(|e| Error::io(format!("failed adding `{}`", path.display()), e))?;
    }

    let manifest = serde_json::json!({
        "BuildTimestamp": packed.build_timestamp,
        "SBOMHash": sbom.hash,
    });
    let manifest = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| Error::io(context(), std::io::Error::other(e)))?;
    let generated = [
        ("sbom.json", sbom.json.as_slice()),
        ("manifest.json", manifest.as_slice()),
    ];
    for (name, contents) in generated {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tar.append_data(&mut header, name, contents)
            .map_err(|e| Error::io(context(), e))?;
    }

    tar.into_inner()
        .and_then(|gz| gz.finish())
        .map_err(|e| Error::io(context(), e))?;
    Ok(())
}
