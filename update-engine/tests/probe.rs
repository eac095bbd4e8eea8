mod fixture;

use appliance_update::{Error, ErrorKind, target::AuthScheme};
use appliance_update_core::HashAlgorithm;
use fixture::{BASIC_AUTH, Fixture};
use wiremock::{
    Mock, ResponseTemplate,
    matchers::{header, method, path},
};

#[tokio::test]
async fn missing_features_endpoint_means_no_features() {
    let fx = Fixture::new().await;
    Mock::given(method("GET"))
        .and(path("/update/features"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&fx.mock_server)
        .await;

    let client = fx.connect().await.unwrap();
    let features = client.features();
    assert!(!features.partuuid);
    assert!(!features.divert);
    assert_eq!(features.hash_algorithm(), HashAlgorithm::Sha256);
}

#[tokio::test]
async fn advertised_features_are_cached() {
    let fx = Fixture::new().await;
    fx.mock_features(&["partuuid", "updatehash=crc32", "divert", "somethingnew"])
        .await;

    let client = fx.connect().await.unwrap();
    let features = client.features();
    assert!(features.partuuid);
    assert!(features.divert);
    assert_eq!(features.hash_algorithm(), HashAlgorithm::Crc32);
}

#[tokio::test]
async fn bearer_challenge_is_answered_once() {
    let fx = Fixture::new().await;
    Mock::given(method("GET"))
        .and(path("/update/features"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"features":["divert"]}"#))
        .expect(1)
        .mount(&fx.mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/update/features"))
        .and(header("authorization", BASIC_AUTH))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", r#"Bearer realm="appliance""#),
        )
        .expect(1)
        .mount(&fx.mock_server)
        .await;

    let client = fx.connect().await.unwrap();
    assert!(client.features().divert);
    assert_eq!(client.target().auth_scheme(), AuthScheme::Bearer);
    assert_eq!(
        client.target().challenge().and_then(|c| c.realm.as_deref()),
        Some("appliance")
    );
}

#[tokio::test]
async fn second_rejection_is_final() {
    let fx = Fixture::new().await;
    Mock::given(method("GET"))
        .and(path("/update/features"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", "Bearer"))
        .expect(2)
        .mount(&fx.mock_server)
        .await;

    let err = fx.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthRejected);
}

#[tokio::test]
async fn rejection_without_challenge_is_not_retried() {
    let fx = Fixture::new().await;
    Mock::given(method("GET"))
        .and(path("/update/features"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&fx.mock_server)
        .await;

    let err = fx.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthRejected);
}

#[tokio::test]
async fn redirect_to_https_is_reported() {
    let fx = Fixture::new().await;
    Mock::given(method("GET"))
        .and(path("/update/features"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", "https://hello/update/features"),
        )
        .expect(1)
        .mount(&fx.mock_server)
        .await;

    let err = fx.connect().await.unwrap_err();
    assert!(
        matches!(&err, Error::HttpsRedirect { location, .. } if location == "https://hello/update/features"),
        "{err:?}"
    );
}

#[tokio::test]
async fn malformed_features_are_a_protocol_error() {
    let fx = Fixture::new().await;
    Mock::given(method("GET"))
        .and(path("/update/features"))
        .respond_with(ResponseTemplate::new(200).set_body_string("partuuid,updatehash"))
        .mount(&fx.mock_server)
        .await;

    let err = fx.connect().await.unwrap_err();
    assert!(matches!(err, Error::MalformedResponse { .. }), "{err:?}");
    assert_eq!(err.kind(), ErrorKind::ProtocolError);
}

#[tokio::test]
async fn unreachable_device_is_reported() {
    let fx = Fixture::new().await;
    let mut target_url = fx.mock_server.uri();
    // Nothing listens on the discard port.
    target_url.truncate(target_url.rfind(':').unwrap());
    let target = appliance_update::Target::new(
        "hello",
        "hello",
        format!("{target_url}:9"),
        appliance_update::target::Transport::Plain,
        secrecy::SecretString::new("secret".to_owned()),
    );
    let err = appliance_update::DeviceClient::connect(
        target,
        appliance_update::EngineSettings::default(),
        &fx.cancel,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unreachable);
}
