//! Resolving an instance to the device it talks to.

use std::{fmt, path::PathBuf};

use appliance_update_core::{InstanceConfig, TlsPosture};
use secrecy::SecretString;
use tracing::debug;

use crate::{Error, Instance, tls};

/// User name presented with HTTP Basic authentication.
pub const BASIC_AUTH_USER: &str = "gokrazy";

/// How the connection to the device is secured.
#[derive(Clone, PartialEq, Eq)]
pub enum Transport {
    Plain,
    /// HTTPS with the recorded certificate as the only trust anchor.
    PinnedTls {
        certificate_der: Vec<u8>,
        fingerprint: String,
    },
    /// HTTPS accepting any certificate once, recording it to `record_to`.
    TrustOnFirstUse { record_to: PathBuf },
    SystemRoots,
}

impl Transport {
    pub fn scheme(&self) -> &'static str {
        match self {
            Transport::Plain => "http",
            _ => "https",
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Plain => f.write_str("Plain"),
            Transport::PinnedTls { fingerprint, .. } => f
                .debug_struct("PinnedTls")
                .field("fingerprint", fingerprint)
                .finish_non_exhaustive(),
            Transport::TrustOnFirstUse { record_to } => f
                .debug_struct("TrustOnFirstUse")
                .field("record_to", record_to)
                .finish(),
            Transport::SystemRoots => f.write_str("SystemRoots"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthScheme {
    #[default]
    Basic,
    Bearer,
}

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: AuthScheme,
    pub realm: Option<String>,
}

impl Challenge {
    /// Parses the first challenge of a `WWW-Authenticate` header value.
    /// Schemes other than Basic and Bearer are not understood.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));
        let scheme = if scheme.eq_ignore_ascii_case("basic") {
            AuthScheme::Basic
        } else if scheme.eq_ignore_ascii_case("bearer") {
            AuthScheme::Bearer
        } else {
            return None;
        };
        let realm = params.split(',').find_map(|param| {
            let (key, value) = param.trim().split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("realm")
                .then(|| value.trim().trim_matches('"').to_owned())
        });
        Some(Self { scheme, realm })
    }
}

/// Everything needed to address one device. Immutable once built; changing the
/// posture or adopting a challenge yields a new value.
#[derive(Debug, Clone)]
pub struct Target {
    instance: String,
    host: String,
    base_url: String,
    transport: Transport,
    credential: SecretString,
    challenge: Option<Challenge>,
}

impl Target {
    /// Resolves the device of `instance`.
    ///
    /// With TLS off a recorded certificate still wins, so enrolling a device
    /// once pins it from then on. `insecure` only matters when no certificate
    /// was recorded yet.
    pub fn resolve(
        instance: &Instance,
        config: &InstanceConfig,
        insecure: bool,
    ) -> Result<Self, Error> {
        let host = config.update_hostname().to_owned();
        let credential = instance.read_credential(&host)?;
        let cert_path = instance.certificate_path(&host);
        let posture = config.tls_posture();

        let transport = if posture == TlsPosture::System {
            Transport::SystemRoots
        } else if cert_path.is_file() {
            let certificate_der = tls::read_certificate(&cert_path)?;
            Transport::PinnedTls {
                fingerprint: tls::fingerprint(&certificate_der),
                certificate_der,
            }
        } else if insecure {
            Transport::TrustOnFirstUse {
                record_to: cert_path,
            }
        } else if posture == TlsPosture::SelfSigned {
            return Err(Error::MissingCertificate {
                host,
                path: cert_path,
            });
        } else {
            Transport::Plain
        };

        let port = match transport {
            Transport::Plain => config.http_port(),
            _ => config.https_port(),
        };
        let base_url = format!("{}://{host}:{port}", transport.scheme());
        debug!(instance = instance.name(), %base_url, ?transport, "resolved target");
        Ok(Self {
            instance: instance.name().to_owned(),
            host,
            base_url,
            transport,
            credential,
            challenge: None,
        })
    }

    /// Builds a target directly, bypassing the instance directory.
    pub fn new(
        instance: impl Into<String>,
        host: impl Into<String>,
        base_url: impl Into<String>,
        transport: Transport,
        credential: SecretString,
    ) -> Self {
        Self {
            instance: instance.into(),
            host: host.into(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            transport,
            credential,
            challenge: None,
        }
    }

    /// A copy of this target that answers `challenge`.
    pub fn with_challenge(&self, challenge: Challenge) -> Self {
        Self {
            challenge: Some(challenge),
            ..self.clone()
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn credential(&self) -> &SecretString {
        &self.credential
    }

    pub fn auth_scheme(&self) -> AuthScheme {
        self.challenge.as_ref().map(|c| c.scheme).unwrap_or_default()
    }

    pub fn challenge(&self) -> Option<&Challenge> {
        self.challenge.as_ref()
    }
}
