//! Capability negotiation on `/update/features`.

use appliance_update_core::{Features, features::FeaturesDocument};
use reqwest::{Method, StatusCode, header::WWW_AUTHENTICATE};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::{DeviceClient, Error, target::Challenge};

pub const FEATURES_PATH: &str = "/update/features";

enum Outcome {
    Features(Features),
    Challenge(Challenge),
}

/// Probes the device once and caches the result on the client.
///
/// A 404 means the device predates the endpoint and supports no optional
/// feature. A first 401 carrying a challenge is answered once with the
/// challenged scheme; a second rejection is final.
#[instrument(skip_all, fields(host = client.target.host()))]
pub async fn probe(
    client: &mut DeviceClient,
    cancel: &CancellationToken,
) -> Result<Features, Error> {
    let features = match fetch(client, cancel).await? {
        Outcome::Features(features) => features,
        Outcome::Challenge(challenge) => {
            info!(?challenge, "device challenged the credential, retrying once");
            client.target = client.target.with_challenge(challenge);
            match fetch(client, cancel).await? {
                Outcome::Features(features) => features,
                Outcome::Challenge(_) => {
                    return Err(Error::AuthRejected {
                        url: client.target.url(FEATURES_PATH),
                        status: StatusCode::UNAUTHORIZED,
                    });
                }
            }
        }
    };
    info!(?features, "probed device features");
    client.features = features;
    Ok(features)
}

async fn fetch(client: &DeviceClient, cancel: &CancellationToken) -> Result<Outcome, Error> {
    let url = client.target.url(FEATURES_PATH);
    let builder = client
        .request(Method::GET, FEATURES_PATH)
        .timeout(client.settings().request_timeout);
    let response = client.send(builder, &url, cancel).await?;

    match response.status() {
        StatusCode::NOT_FOUND => return Ok(Outcome::Features(Features::default())),
        StatusCode::UNAUTHORIZED => {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|h| h.to_str().ok())
                .and_then(Challenge::parse);
            if let Some(challenge) = challenge {
                return Ok(Outcome::Challenge(challenge));
            }
        }
        _ => {}
    }

    let response = client.expect_success(response, &url).await?;
    let body = client.read_text(response, &url, cancel).await?;
    let document: FeaturesDocument =
        serde_json::from_str(&body).map_err(|e| Error::MalformedResponse {
            url,
            reason: e.to_string(),
        })?;
    Ok(Outcome::Features(document.into()))
}
