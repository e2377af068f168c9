mod properties;

use bytes::Bytes;
use memchr::memmem;

use crate::{BodyError, Message};

/// Longest excerpt of an error body kept in a [ReceiveError].
const REASON_LIMIT: usize = 256;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReceiveError {
    #[error("Access was denied ({status}): {reason}")]
    Unauthorized { status: u16, reason: String },

    #[error("Topic or subscription does not exist ({status}): {reason}")]
    EntityNotFound { status: u16, reason: String },

    #[error("Server is busy ({status}); backing off")]
    ServerBusy { status: u16 },

    #[error("Unexpected response status {status}: {reason}")]
    UnexpectedStatus { status: u16, reason: String },

    /// The broker could not be reached, or the exchange broke off before a
    /// status line arrived.
    #[error("Transport failure: {0}")]
    Transport(String),
}

impl ReceiveError {
    /// Whether retrying the same request can never succeed.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Unauthorized { .. } | Self::EntityNotFound { .. } => true,
            Self::UnexpectedStatus { status, .. } => (400..500).contains(status),
            Self::ServerBusy { .. } | Self::Transport(_) => false,
        }
    }
}

/// Everything of an HTTP response to a [crate::ReceiveRequest] that decoding looks at.
#[derive(Clone, Debug)]
pub struct ReceiveResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// `Err` if the connection failed while the body was being read.
    pub body: Result<Bytes, BodyError>,
}

impl ReceiveResponse {
    /// `Ok(None)` means the long poll expired without a message.
    ///
    /// A 200 or 201 always yields a message, since the broker deleted it when
    /// answering; an unreadable body is left for the callback to report.
    pub fn decode(self) -> Result<Option<Message>, ReceiveError> {
        match self.status {
            200 | 201 => {}
            204 => return Ok(None),
            401 | 403 => {
                return Err(ReceiveError::Unauthorized {
                    status: self.status,
                    reason: self.reason(),
                })
            }
            404 | 410 => {
                return Err(ReceiveError::EntityNotFound {
                    status: self.status,
                    reason: self.reason(),
                })
            }
            429 | 503 => return Err(ReceiveError::ServerBusy { status: self.status }),
            status => {
                return Err(ReceiveError::UnexpectedStatus {
                    status,
                    reason: self.reason(),
                })
            }
        }

        let properties = properties::broker_properties(&self.headers);
        let user_properties = properties::user_properties(&self.headers);
        log::trace!(
            "Decoded message {:?} with {} user properties",
            properties.message_id,
            user_properties.len()
        );

        Ok(Some(Message {
            properties,
            user_properties,
            body: self.body,
        }))
    }

    /// Error bodies are XML: `<Error><Code>..</Code><Detail>..</Detail></Error>`.
    fn reason(&self) -> String {
        let body = self.body.as_deref().unwrap_or_default();
        let detail = memmem::find(body, b"<Detail>")
            .map(|start| &body[start + b"<Detail>".len()..])
            .and_then(|rest| memmem::find(rest, b"</Detail>").map(|end| &rest[..end]))
            .unwrap_or(body);

        let text = String::from_utf8_lossy(detail);
        let text = text.trim();
        match text.char_indices().nth(REASON_LIMIT) {
            Some((cut, _)) => format!("{}...", &text[..cut]),
            None if text.is_empty() => "no details".into(),
            None => text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::{ReceiveError, ReceiveResponse};
    use crate::BodyError;

    fn response(status: u16, headers: &[(&str, &str)], body: &'static [u8]) -> ReceiveResponse {
        ReceiveResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: Ok(Bytes::from_static(body)),
        }
    }

    #[test]
    fn message() {
        let message = response(
            200,
            &[
                ("Content-Type", "application/json"),
                (
                    "BrokerProperties",
                    r#"{"DeliveryCount":1,"MessageId":"abc","SequenceNumber":4}"#,
                ),
                ("Priority", r#""High""#),
            ],
            br#"{"a":1}"#,
        )
        .decode()
        .unwrap()
        .expect("200 carries a message");

        assert_eq!(message.body, Ok(Bytes::from_static(br#"{"a":1}"#)));
        assert_eq!(message.properties.message_id.as_deref(), Some("abc"));
        assert_eq!(message.properties.sequence_number, Some(4));
        assert_eq!(
            message.user_properties.get("Priority").map(String::as_str),
            Some("High")
        );
        assert!(!message.user_properties.contains_key("Content-Type"));
    }

    #[test]
    fn no_message() {
        assert_eq!(response(204, &[], b"").decode(), Ok(None));
    }

    #[test]
    fn broken_broker_properties_still_deliver() {
        let message = response(201, &[("BrokerProperties", "{not json")], b"body")
            .decode()
            .unwrap()
            .unwrap();

        assert_eq!(message.properties, Default::default());
        assert_eq!(message.body, Ok(Bytes::from_static(b"body")));
    }

    #[test]
    fn truncated_body_still_delivers() {
        let truncated = ReceiveResponse {
            body: Err(BodyError("connection closed before message completed".into())),
            ..response(
                200,
                &[("BrokerProperties", r#"{"MessageId":"lost","SequenceNumber":9}"#)],
                b"",
            )
        };

        let message = truncated.decode().unwrap().expect("200 carries a message");
        assert_eq!(message.properties.message_id.as_deref(), Some("lost"));
        assert_eq!(
            message.body,
            Err(BodyError("connection closed before message completed".into()))
        );
    }

    #[test]
    fn unreadable_error_body() {
        let err = ReceiveResponse {
            body: Err(BodyError("reset".into())),
            ..response(403, &[], b"")
        }
        .decode()
        .unwrap_err();

        assert_eq!(
            err,
            ReceiveError::Unauthorized {
                status: 403,
                reason: "no details".into()
            }
        );
    }

    #[test]
    fn unauthorized_is_fatal() {
        let err = response(
            401,
            &[],
            b"<Error><Code>401</Code><Detail>InvalidSignature: The token has an invalid signature.</Detail></Error>",
        )
        .decode()
        .unwrap_err();

        assert_eq!(
            err,
            ReceiveError::Unauthorized {
                status: 401,
                reason: "InvalidSignature: The token has an invalid signature.".into()
            }
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn missing_entity_is_fatal() {
        let err = response(404, &[], b"").decode().unwrap_err();
        assert_eq!(
            err,
            ReceiveError::EntityNotFound {
                status: 404,
                reason: "no details".into()
            }
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn transient_failures() {
        let busy = response(503, &[], b"").decode().unwrap_err();
        assert_eq!(busy, ReceiveError::ServerBusy { status: 503 });
        assert!(!busy.is_fatal());

        let internal = response(500, &[], b"oops").decode().unwrap_err();
        assert!(!internal.is_fatal());

        let bad_request = response(400, &[], b"bad").decode().unwrap_err();
        assert!(bad_request.is_fatal());

        assert!(!ReceiveError::Transport("connection reset".into()).is_fatal());
    }
}
