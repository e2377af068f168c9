use std::{collections::HashMap, time::Duration};

mod connection_string;
mod decoding;
mod sas;
mod shape;

pub use connection_string::{ConnectionString, ConnectionStringError};
pub use decoding::{ReceiveError, ReceiveResponse};
pub use sas::SasToken;
pub use shape::{has_connection_string_shape, is_valid_entity_name};

use bytes::Bytes;

/// Server-side long-poll period of a single receive request.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) const BROKER_PROPERTIES_HEADER: &str = "BrokerProperties";

/// Metadata the broker attaches to every message, carried as JSON in the
/// `BrokerProperties` response header.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BrokerProperties {
    pub message_id: Option<String>,
    pub sequence_number: Option<u64>,
    pub delivery_count: Option<u32>,
    pub enqueued_time_utc: Option<String>,
    pub enqueued_sequence_number: Option<u64>,
    pub label: Option<String>,
    pub content_type: Option<String>,
    pub correlation_id: Option<String>,
    pub session_id: Option<String>,
    pub to: Option<String>,
    pub reply_to: Option<String>,
    pub time_to_live: Option<f64>,
}

/// The broker handed over a message, and with it deleted it, but its body
/// could not be read in full.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to read message body: {0}")]
pub struct BodyError(pub String);

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub properties: BrokerProperties,
    /// Custom application properties, sent by the broker as plain headers.
    pub user_properties: HashMap<String, String>,
    pub body: Result<Bytes, BodyError>,
}

impl Message {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            properties: BrokerProperties::default(),
            user_properties: HashMap::new(),
            body: Ok(body.into()),
        }
    }

    pub fn body_len(&self) -> Option<usize> {
        self.body.as_ref().ok().map(Bytes::len)
    }
}

/// A destructive read of the message at the head of a topic subscription.
///
/// Issued as `DELETE <base>/<topic>/subscriptions/<subscription>/messages/head?timeout=<secs>`;
/// the broker removes the message as it hands it over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub topic: String,
    pub subscription: String,
    pub timeout: Duration,
}

impl ReceiveRequest {
    pub fn new(topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            subscription: subscription.into(),
            timeout: DEFAULT_RECEIVE_TIMEOUT,
        }
    }

    /// Path of the subscription entity, which is also the SAS resource.
    pub fn entity_path(&self) -> String {
        format!("{}/subscriptions/{}", self.topic, self.subscription)
    }

    pub fn path(&self) -> String {
        format!("/{}/messages/head", self.entity_path())
    }

    pub fn query(&self) -> String {
        format!("timeout={}", self.timeout.as_secs())
    }

    pub fn url(&self, base_url: &str) -> String {
        format!(
            "{}{}?{}",
            base_url.trim_end_matches('/'),
            self.path(),
            self.query()
        )
    }
}

#[cfg(test)]
mod request {
    use std::time::Duration;

    use crate::ReceiveRequest;

    #[test]
    fn receive_and_delete_url() {
        let request = ReceiveRequest::new("my_topic", "testApp1");
        assert_eq!(request.entity_path(), "my_topic/subscriptions/testApp1");
        assert_eq!(
            request.url("https://mysb.servicebus.windows.net/"),
            "https://mysb.servicebus.windows.net/my_topic/subscriptions/testApp1/messages/head?timeout=60"
        );
    }

    #[test]
    fn custom_timeout() {
        let request = ReceiveRequest {
            timeout: Duration::from_secs(5),
            ..ReceiveRequest::new("orders", "audit")
        };
        assert_eq!(
            request.url("http://127.0.0.1:8080"),
            "http://127.0.0.1:8080/orders/subscriptions/audit/messages/head?timeout=5"
        );
    }
}
