use std::{
    future::Future,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH};
use servicebus_codec::{
    BodyError, ConnectionString, Message, ReceiveError, ReceiveRequest, ReceiveResponse, SasToken,
};

/// Extra time granted to the HTTP round trip on top of the server-side long poll.
const REQUEST_GRACE: Duration = Duration::from_secs(10);

/// Lifetime of the SAS token signed for each request.
const TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Performs receive-and-delete requests against the broker.
///
/// `Ok(None)` means the request's long poll expired without a message.
pub trait Transport: Send + Sync + 'static {
    fn receive(
        &self,
        request: ReceiveRequest,
    ) -> impl Future<Output = Result<Option<Message>, ReceiveError>> + Send;
}

/// [Transport] over the broker's HTTPS interface, authorized with SAS tokens.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    key_name: String,
    key: String,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("key_name", &self.key_name)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(connection_string: &ConnectionString) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("servicebus-topic-listener/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: connection_string.base_url(),
            key_name: connection_string.shared_access_key_name.clone(),
            key: connection_string.shared_access_key.clone(),
        })
    }

    fn authorization(&self, request: &ReceiveRequest) -> SasToken {
        let resource = format!("{}/{}", self.base_url, request.entity_path());
        let expiry = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .saturating_add(TOKEN_TTL)
            .as_secs();

        SasToken::sign(&resource, &self.key_name, &self.key, expiry)
    }
}

impl Transport for HttpTransport {
    async fn receive(&self, request: ReceiveRequest) -> Result<Option<Message>, ReceiveError> {
        let url = request.url(&self.base_url);
        log::trace!("DELETE {url}");

        let response = self
            .client
            .delete(&url)
            .header(AUTHORIZATION, self.authorization(&request).to_string())
            .header(CONTENT_LENGTH, 0)
            .timeout(request.timeout + REQUEST_GRACE)
            .send()
            .await
            .map_err(|e| ReceiveError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        // Once the status line arrived the broker has settled the receive, so
        // a broken body must not be retried as if nothing happened.
        let body = response.bytes().await.map_err(|e| {
            log::warn!("Failed to read body of {status} response: {e}");
            BodyError(e.to_string())
        });
        log::debug!("Receive on {} answered {status}", request.entity_path());

        ReceiveResponse {
            status,
            headers,
            body,
        }
        .decode()
    }
}
