//! Minimal Matrix client-server API session.

use super::sync::SyncResponse;
use imbridge_core::SecretString;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Extra time allowed on top of the server-side long-poll timeout.
const LONG_POLL_SLACK: Duration = Duration::from_secs(10);

/// Budget for requests that are not long polls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Filter for the first sync: just enough to learn the `since` token.
const INITIAL_FILTER: &str = r#"{"room":{"timeline":{"limit":1}}}"#;

#[derive(Debug, Error)]
pub(crate) enum ApiError {
    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    Url(String),
}

impl ApiError {
    /// 5xx from the homeserver.
    pub(crate) fn is_server_error(&self) -> bool {
        matches!(self, ApiError::Status { status, .. } if status.is_server_error())
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// A user's global profile.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub(crate) struct Profile {
    #[serde(default)]
    pub displayname: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Deserialize)]
struct SendResponse {
    event_id: String,
}

/// Authenticated HTTP session against one homeserver.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    client: Client,
    homeserver: Url,
    device_id: String,
}

impl Session {
    pub(crate) fn new(homeserver: &Url, token: &SecretString, device_id: &str) -> ApiResult<Self> {
        let mut auth = HeaderValue::from_str(&token.bearer())
            .map_err(|_| ApiError::Url("access token is not a valid header value".into()))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            homeserver: homeserver.clone(),
            device_id: device_id.to_string(),
        })
    }

    /// `/sync`. `since = None` performs the initial, backlog-skipping sync.
    pub(crate) async fn sync(&self, since: Option<&str>, timeout: Duration) -> ApiResult<SyncResponse> {
        let url = endpoint(&self.homeserver, &["_matrix", "client", "v3", "sync"])?;
        let timeout_ms = timeout.as_millis().to_string();

        let mut request = self
            .client
            .get(url)
            .timeout(timeout + LONG_POLL_SLACK)
            .query(&[("timeout", timeout_ms.as_str())]);
        request = match since {
            Some(since) => request.query(&[("since", since)]),
            None => request.query(&[("filter", INITIAL_FILTER)]),
        };

        let response = check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// `/versions`, used to tell whether the homeserver answers at all.
    pub(crate) async fn versions(&self) -> ApiResult<()> {
        let url = endpoint(&self.homeserver, &["_matrix", "client", "versions"])?;
        check(self.client.get(url).timeout(REQUEST_TIMEOUT).send().await?).await?;
        Ok(())
    }

    pub(crate) async fn profile(&self, user_id: &str) -> ApiResult<Profile> {
        let url = endpoint(&self.homeserver, &["_matrix", "client", "v3", "profile", user_id])?;
        let response = check(self.client.get(url).timeout(REQUEST_TIMEOUT).send().await?).await?;
        Ok(response.json().await?)
    }

    /// Send an `m.text` message and return its event ID.
    pub(crate) async fn send_text(&self, room_id: &str, body: &str) -> ApiResult<String> {
        let txn = transaction_id(&self.device_id);
        let url = endpoint(
            &self.homeserver,
            &["_matrix", "client", "v3", "rooms", room_id, "send", "m.room.message", &txn],
        )?;

        let response = self
            .client
            .put(url)
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({ "msgtype": "m.text", "body": body }))
            .send()
            .await?;
        let sent: SendResponse = check(response).await?.json().await?;
        Ok(sent.event_id)
    }

    /// Download URL for an `mxc://` content URI.
    pub(crate) fn media_url(&self, mxc: &str) -> Option<String> {
        mxc_to_http(&self.homeserver, mxc)
    }
}

async fn check(response: reqwest::Response) -> ApiResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status { status, body })
}

/// Transaction ID for an outbound event, scoped to this device.
pub(crate) fn transaction_id(device_id: &str) -> String {
    let unique = uuid::Uuid::new_v4().simple();
    match device_id.trim() {
        "" => unique.to_string(),
        device => format!("{}.{}", device, unique),
    }
}

/// Append percent-encoded path segments to the homeserver base URL.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> ApiResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ApiError::Url(format!("{} cannot be a base URL", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// `mxc://server/media` to `{homeserver}/_matrix/media/v3/download/server/media`.
pub(crate) fn mxc_to_http(base: &Url, mxc: &str) -> Option<String> {
    let (server, media) = mxc.strip_prefix("mxc://")?.split_once('/')?;
    if server.is_empty() || media.is_empty() {
        return None;
    }
    endpoint(base, &["_matrix", "media", "v3", "download", server, media])
        .ok()
        .map(String::from)
}
