use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// A Shared Access Signature granting access to `resource` until `expiry`
/// (seconds since the Unix epoch).
///
/// Rendered with [std::fmt::Display] into the value of the `Authorization` header.
#[derive(Clone, PartialEq, Eq)]
pub struct SasToken {
    resource: String,
    signature: String,
    expiry: u64,
    key_name: String,
}

impl SasToken {
    pub fn sign(resource_uri: &str, key_name: &str, key: &str, expiry: u64) -> Self {
        let resource = percent_encode(resource_uri);
        let string_to_sign = format!("{resource}\n{expiry}");

        let mut mac =
            Hmac::<Sha256>::new_from_slice(key.as_bytes()).expect("HMAC can take key of any size");
        mac.update(string_to_sign.as_bytes());
        let digest = mac.finalize().into_bytes();

        Self {
            resource,
            signature: base64::engine::general_purpose::STANDARD.encode(digest),
            expiry,
            key_name: key_name.to_string(),
        }
    }

    /// Base64 HMAC-SHA256 over the encoded resource and expiry.
    pub fn signature(&self) -> &str {
        &self.signature
    }
}

impl std::fmt::Display for SasToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
            self.resource,
            percent_encode(&self.signature),
            self.expiry,
            percent_encode(&self.key_name)
        )
    }
}

impl std::fmt::Debug for SasToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SasToken")
            .field("resource", &self.resource)
            .field("expiry", &self.expiry)
            .field("key_name", &self.key_name)
            .finish()
    }
}

/// RFC 3986 percent-encoding; everything but unreserved characters is escaped.
fn percent_encode(input: &str) -> String {
    use std::fmt::Write as _;

    let mut encoded = String::with_capacity(input.len() * 3);
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            encoded.push(byte as char);
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;

    use super::{percent_encode, SasToken};

    const RESOURCE: &str = "https://mysb.servicebus.windows.net/my_topic/subscriptions/testApp1";

    #[test]
    fn encoding() {
        assert_eq!(
            percent_encode("https://x/a b"),
            "https%3A%2F%2Fx%2Fa%20b"
        );
        assert_eq!(percent_encode("ab+/=="), "ab%2B%2F%3D%3D");
        assert_eq!(percent_encode("my_topic.v2~"), "my_topic.v2~");
    }

    #[test]
    fn header_layout() {
        let token = SasToken::sign(RESOURCE, "tempReaderAccessKey", "secret=", 1_700_000_000);
        let rendered = token.to_string();

        assert!(rendered.starts_with(
            "SharedAccessSignature sr=https%3A%2F%2Fmysb.servicebus.windows.net%2Fmy_topic%2Fsubscriptions%2FtestApp1&sig="
        ));
        assert!(rendered.ends_with("&se=1700000000&skn=tempReaderAccessKey"));
        assert!(!rendered.contains("secret"));

        let digest = base64::engine::general_purpose::STANDARD
            .decode(token.signature())
            .unwrap();
        assert_eq!(digest.len(), 32);
    }

    #[test]
    fn signature_depends_on_inputs() {
        let token = SasToken::sign(RESOURCE, "reader", "key-one", 100);
        assert_eq!(token, SasToken::sign(RESOURCE, "reader", "key-one", 100));
        assert_ne!(
            token.signature(),
            SasToken::sign(RESOURCE, "reader", "key-two", 100).signature()
        );
        assert_ne!(
            token.signature(),
            SasToken::sign(RESOURCE, "reader", "key-one", 101).signature()
        );
    }
}
