//! One HTTP client per [`Target`].

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use appliance_update_core::{DeviceStatus, Features};
use reqwest::{
    Client, Method, RequestBuilder, Response, StatusCode,
    header::{ACCEPT, LOCATION},
    redirect::Policy,
    tls::TlsInfo,
};
use secrecy::ExposeSecret as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::{
    EngineSettings, Error,
    probe,
    target::{AuthScheme, BASIC_AUTH_USER, Target, Transport},
    tls,
};

const APP_USER_AGENT: &str =
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Longest response body quoted in an error.
const MAX_ERROR_BODY: usize = 512;

/// Talks to one device. Cloning shares the connection pool.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    pub(crate) target: Target,
    http: Client,
    pub(crate) features: Features,
    settings: EngineSettings,
    certificate_recorded: Arc<AtomicBool>,
}

impl DeviceClient {
    /// Builds the client for `target` without contacting the device.
    pub fn new(target: Target, settings: EngineSettings) -> Result<Self, Error> {
        let http = build_http_client(target.transport(), &settings)?;
        Ok(Self {
            target,
            http,
            features: Features::default(),
            settings,
            certificate_recorded: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Builds the client and probes the device's capabilities.
    pub async fn connect(
        target: Target,
        settings: EngineSettings,
        cancel: &CancellationToken,
    ) -> Result<Self, Error> {
        let mut client = Self::new(target, settings)?;
        probe::probe(&mut client, cancel).await?;
        Ok(client)
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Capabilities found by the last probe.
    pub fn features(&self) -> &Features {
        &self.features
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// A request to `path` carrying the target's credential.
    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.target.url(path));
        let secret = self.target.credential().expose_secret();
        match self.target.auth_scheme() {
            AuthScheme::Basic => builder.basic_auth(BASIC_AUTH_USER, Some(secret)),
            AuthScheme::Bearer => builder.bearer_auth(secret),
        }
    }

    /// Sends `builder`, racing it against `cancel`.
    ///
    /// Redirects are never followed: a redirect to HTTPS means the device
    /// enforces TLS and the instance is misconfigured.
    pub(crate) async fn send(
        &self,
        builder: RequestBuilder,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Response, Error> {
        let response = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            response = builder.send() => response.map_err(|source| Error::Transport {
                url: url.to_owned(),
                source,
            })?,
        };
        self.record_certificate(&response)?;

        if response.status().is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|l| l.to_str().ok())
                .unwrap_or_default()
                .to_owned();
            if location.starts_with("https://") {
                return Err(Error::HttpsRedirect {
                    url: url.to_owned(),
                    location,
                });
            }
            return Err(Error::UnexpectedStatus {
                url: url.to_owned(),
                status: response.status(),
                body: format!("redirect to `{location}`"),
            });
        }
        Ok(response)
    }

    /// Maps non success statuses to errors.
    pub(crate) async fn expect_success(
        &self,
        response: Response,
        url: &str,
    ) -> Result<Response, Error> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(Error::AuthRejected {
                url: url.to_owned(),
                status,
            });
        }
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut end = MAX_ERROR_BODY;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }
        Err(Error::UnexpectedStatus {
            url: url.to_owned(),
            status,
            body: body.trim().to_owned(),
        })
    }

    /// Reads a short response body, racing it against `cancel`.
    pub(crate) async fn read_text(
        &self,
        response: Response,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        tokio::select! {
            () = cancel.cancelled() => Err(Error::Cancelled),
            text = response.text() => text.map_err(|source| Error::Transport {
                url: url.to_owned(),
                source,
            }),
        }
    }

    /// `POST path` with an empty body, expecting success.
    #[instrument(skip(self, cancel), fields(host = self.target.host()))]
    pub(crate) async fn post_empty(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let url = self.target.url(path);
        let builder = self
            .request(Method::POST, path)
            .timeout(self.settings.request_timeout);
        let response = self.send(builder, &url, cancel).await?;
        self.expect_success(response, &url).await?;
        debug!("{path} succeeded");
        Ok(())
    }

    /// Reads the status document the device announces on `/`.
    pub async fn status(&self, cancel: &CancellationToken) -> Result<DeviceStatus, Error> {
        let url = self.target.url("/");
        let builder = self
            .request(Method::GET, "/")
            .header(ACCEPT, "application/json")
            .timeout(self.settings.request_timeout);
        let response = self.send(builder, &url, cancel).await?;
        let response = self.expect_success(response, &url).await?;
        let body = self.read_text(response, &url, cancel).await?;
        serde_json::from_str(&body).map_err(|e| Error::MalformedResponse {
            url,
            reason: e.to_string(),
        })
    }

    /// Stores the peer certificate the first time a trust-on-first-use
    /// connection succeeds.
    fn record_certificate(&self, response: &Response) -> Result<(), Error> {
        let Transport::TrustOnFirstUse { record_to } = self.target.transport() else {
            return Ok(());
        };
        if self.certificate_recorded.load(Ordering::Acquire) {
            return Ok(());
        }
        let Some(der) = response
            .extensions()
            .get::<TlsInfo>()
            .and_then(|info| info.peer_certificate())
        else {
            return Ok(());
        };
        if !self.certificate_recorded.swap(true, Ordering::AcqRel) {
            tls::record_certificate(record_to, der)?;
        }
        Ok(())
    }
}

fn build_http_client(
    transport: &Transport,
    settings: &EngineSettings,
) -> Result<Client, Error> {
    let builder = Client::builder()
        .redirect(Policy::none())
        .user_agent(APP_USER_AGENT)
        .connect_timeout(settings.connect_timeout);
    let builder = match transport {
        Transport::Plain => builder,
        Transport::PinnedTls {
            certificate_der, ..
        } => {
            let certificate = reqwest::Certificate::from_der(certificate_der)
                .map_err(Error::BuildClient)?;
            builder
                .tls_built_in_root_certs(false)
                .add_root_certificate(certificate)
        }
        Transport::TrustOnFirstUse { .. } => {
            builder.danger_accept_invalid_certs(true).tls_info(true)
        }
        Transport::SystemRoots => builder.tls_built_in_root_certs(true),
    };
    builder.build().map_err(Error::BuildClient)
}
