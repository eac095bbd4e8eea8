use std::{fs, time::Duration};

use appliance_update::{Error, ErrorKind, push::PushClient};
use reqwest::StatusCode;
use secrecy::SecretString;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_bytes, header, method, path},
};

const ARCHIVE: &[u8] = b"\x1f\x8b not really a tarball";

struct Server {
    dir: TempDir,
    mock_server: MockServer,
}

impl Server {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("push.tar.gz"), ARCHIVE).unwrap();
        Self {
            dir,
            mock_server: MockServer::start().await,
        }
    }

    async fn push(&self) -> Result<serde_json::Value, Error> {
        let server = Url::parse(&format!("{}/fleet", self.mock_server.uri())).unwrap();
        let client = PushClient::new(
            &server,
            SecretString::new("push-token".to_owned()),
            Duration::from_secs(1),
        )
        .unwrap();
        client
            .push(&self.dir.path().join("push.tar.gz"), &CancellationToken::new())
            .await
    }
}

#[test_log::test(tokio::test)]
async fn archive_is_put_with_the_bearer_token() {
    let server = Server::start().await;
    let reply = json!({"Build": "fake-update-1", "Devices": ["hello"]});
    Mock::given(method("PUT"))
        .and(path("/fleet/api/v1/push"))
        .and(header("authorization", "Bearer push-token"))
        .and(body_bytes(ARCHIVE))
        .respond_with(ResponseTemplate::new(200).set_body_json(&reply))
        .expect(1)
        .mount(&server.mock_server)
        .await;

    assert_eq!(server.push().await.unwrap(), reply);
}

#[tokio::test]
async fn rejected_token_is_reported() {
    let server = Server::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server.mock_server)
        .await;

    let err = server.push().await.unwrap_err();
    assert!(matches!(
        err,
        Error::AuthRejected {
            status: StatusCode::UNAUTHORIZED,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::AuthRejected);
}

#[tokio::test]
async fn other_statuses_keep_the_reply_body() {
    let server = Server::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(409).set_body_string("build already pushed"))
        .expect(1)
        .mount(&server.mock_server)
        .await;

    let err = server.push().await.unwrap_err();
    assert!(matches!(
        err,
        Error::UnexpectedStatus {
            status: StatusCode::CONFLICT,
            ref body,
            ..
        } if body == "build already pushed"
    ));
    assert_eq!(err.kind(), ErrorKind::ProtocolError);
}

#[test]
fn server_address_without_a_path_is_a_local_error() {
    let server = Url::parse("mailto:ops@example.com").unwrap();
    let err = PushClient::new(
        &server,
        SecretString::new("push-token".to_owned()),
        Duration::from_secs(1),
    )
    .unwrap_err();
    assert!(matches!(err, Error::InvalidUrl { .. }));
    assert_eq!(err.kind(), ErrorKind::Local);
}
