#![allow(dead_code)]

use std::{fs, path::PathBuf, time::Duration};

use appliance_update::{
    DeviceClient, EngineSettings, Error, Target,
    retry::Backoff,
    target::Transport,
    upload::UpdateHasher,
};
use appliance_update_core::{HashAlgorithm, PackedImage};
use secrecy::SecretString;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::{
    Mock, MockServer, Request, Respond, ResponseTemplate,
    matchers::{header, method, path},
};

pub const OLD_BUILD: &str = "2024-01-01T00:00:00Z";
pub const NEW_BUILD: &str = "fake-update-1";
pub const BASIC_AUTH: &str = "Basic Z29rcmF6eTpzZWNyZXQ=";

/// A temporary directory holding packed images and a mock device.
pub struct Fixture {
    dir: TempDir,
    pub mock_server: MockServer,
    pub cancel: CancellationToken,
    settings: EngineSettings,
}

#[bon::bon]
impl Fixture {
    pub async fn new() -> Self {
        Fixture::with().build().await
    }

    #[builder(start_fn = with)]
    pub async fn builder(
        #[builder(default = Duration::from_millis(200))] reboot_request_timeout: Duration,
        #[builder(default = Duration::from_secs(3))] reboot_window: Duration,
        #[builder(default = Duration::from_millis(20))] poll_interval: Duration,
        #[builder(default = 2)] log_reconnects: u32,
    ) -> Self {
        let fast = Backoff {
            attempts: 3,
            base: Duration::from_millis(5),
            max: Duration::from_millis(20),
        };
        let settings = EngineSettings {
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(1),
            reboot_request_timeout,
            reboot_window,
            poll_interval,
            upload_backoff: fast,
            idempotent_backoff: fast,
            log_reconnects,
            log_reconnect_delay: Duration::from_millis(10),
        };
        Self {
            dir: tempfile::tempdir().unwrap(),
            mock_server: MockServer::start().await,
            cancel: CancellationToken::new(),
            settings,
        }
    }

    pub fn target(&self) -> Target {
        Fixture::target_for(&self.mock_server.uri())
    }

    /// A plain HTTP target at `base_url` with the fixture's credential.
    pub fn target_for(base_url: &str) -> Target {
        Target::new(
            "hello",
            "hello",
            base_url,
            Transport::Plain,
            SecretString::new("secret".to_owned()),
        )
    }

    pub async fn connect(&self) -> Result<DeviceClient, Error> {
        DeviceClient::connect(self.target(), self.settings.clone(), &self.cancel).await
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Writes small boot, root and MBR images.
    pub fn packed(&self) -> PackedImage {
        fs::write(self.path("boot.img"), b"boot partition contents").unwrap();
        fs::write(self.path("root.img"), vec![0x5a; 256 * 1024]).unwrap();
        fs::write(self.path("mbr.img"), [0xfa; 512]).unwrap();
        PackedImage {
            boot: self.path("boot.img"),
            root: self.path("root.img"),
            mbr: Some(self.path("mbr.img")),
            bootloader: None,
            build_timestamp: NEW_BUILD.to_owned(),
        }
    }

    pub async fn mock_features(&self, features: &[&str]) {
        Mock::given(method("GET"))
            .and(path("/update/features"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "features": features })),
            )
            .mount(&self.mock_server)
            .await;
    }

    /// Answers every upload to `to` with the digest of what it received.
    pub async fn mock_upload(&self, verb: &str, to: &str, algorithm: HashAlgorithm) {
        Mock::given(method(verb))
            .and(path(to))
            .and(header("X-Gokrazy-Update-Hash", algorithm.as_str()))
            .and(header("authorization", BASIC_AUTH))
            .respond_with(DigestResponder {
                algorithm,
                flip_byte: false,
            })
            .mount(&self.mock_server)
            .await;
    }

    pub async fn mock_ok(&self, verb: &str, to: &str, times: u64) {
        Mock::given(method(verb))
            .and(path(to))
            .respond_with(ResponseTemplate::new(200))
            .expect(times)
            .mount(&self.mock_server)
            .await;
    }

    /// The next `times` status reads return `status`.
    pub async fn mock_status(&self, status: serde_json::Value, times: Option<u64>) {
        let mock = Mock::given(method("GET"))
            .and(path("/"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(status));
        let mock = match times {
            Some(n) => mock.up_to_n_times(n),
            None => mock,
        };
        mock.mount(&self.mock_server).await;
    }

    /// Method and path of every request the device saw, minus status reads.
    pub async fn mutating_requests(&self) -> Vec<String> {
        self.mock_server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() != "/")
            .map(|r| format!("{} {}", r.method, r.url.path()))
            .collect()
    }
}

pub fn status(build: &str, active: &str) -> serde_json::Value {
    json!({
        "BuildTimestamp": build,
        "BootSelector": {"Active": active, "Pending": null, "Committed": true},
    })
}

/// Stands in for the device's partition writer: hashes the body and answers
/// with the hex digest. `flip_byte` corrupts the body first, like a broken
/// middlebox would.
pub struct DigestResponder {
    pub algorithm: HashAlgorithm,
    pub flip_byte: bool,
}

impl Respond for DigestResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut body = request.body.clone();
        if self.flip_byte
            && let Some(first) = body.first_mut()
        {
            *first ^= 0x01;
        }
        let mut hasher = UpdateHasher::new(self.algorithm);
        hasher.update(&body);
        ResponseTemplate::new(200).set_body_string(hex::encode(hasher.finalize()))
    }
}
