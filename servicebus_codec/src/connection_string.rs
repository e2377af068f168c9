use std::str::FromStr;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConnectionStringError {
    #[error("Connection string is missing `{0}`")]
    MissingKey(&'static str),

    #[error("Connection string segment `{0}` is not a `Key=Value` pair")]
    MalformedSegment(String),

    #[error("Endpoint `{0}` does not name a host")]
    BadEndpoint(String),
}

/// Parsed form of `Endpoint=sb://<namespace>/;SharedAccessKeyName=<name>;SharedAccessKey=<key>`.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub endpoint: String,
    pub shared_access_key_name: String,
    pub shared_access_key: String,
    pub entity_path: Option<String>,
}

impl std::fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionString")
            .field("endpoint", &self.endpoint)
            .field("shared_access_key_name", &self.shared_access_key_name)
            .field("shared_access_key", &"<redacted>")
            .field("entity_path", &self.entity_path)
            .finish()
    }
}

impl FromStr for ConnectionString {
    type Err = ConnectionStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut endpoint = None;
        let mut shared_access_key_name = None;
        let mut shared_access_key = None;
        let mut entity_path = None;

        for segment in s.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            // Keys never contain `=`, but base64 keys end with it
            let Some((key, value)) = segment.split_once('=') else {
                return Err(ConnectionStringError::MalformedSegment(segment.into()));
            };

            let slot = match key.trim().to_ascii_lowercase().as_str() {
                "endpoint" => &mut endpoint,
                "sharedaccesskeyname" => &mut shared_access_key_name,
                "sharedaccesskey" => &mut shared_access_key,
                "entitypath" => &mut entity_path,
                other => {
                    log::debug!("Ignoring connection string key `{other}`");
                    continue;
                }
            };
            *slot = Some(value.trim().to_string());
        }

        let endpoint = endpoint.ok_or(ConnectionStringError::MissingKey("Endpoint"))?;
        let host = endpoint
            .split_once("://")
            .map(|(_scheme, rest)| rest)
            .unwrap_or(&endpoint)
            .trim_end_matches('/');
        if host.is_empty() {
            return Err(ConnectionStringError::BadEndpoint(endpoint));
        }

        Ok(Self {
            endpoint,
            shared_access_key_name: shared_access_key_name
                .ok_or(ConnectionStringError::MissingKey("SharedAccessKeyName"))?,
            shared_access_key: shared_access_key
                .ok_or(ConnectionStringError::MissingKey("SharedAccessKey"))?,
            entity_path,
        })
    }
}

impl ConnectionString {
    /// HTTP base address of the namespace.
    ///
    /// `sb://` endpoints are served over HTTPS; explicit `http://` and `https://`
    /// endpoints are kept as they are.
    pub fn base_url(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        match endpoint.split_once("://") {
            Some(("http" | "https", _)) => endpoint.to_string(),
            Some((_scheme, host)) => format!("https://{host}"),
            None => format!("https://{endpoint}"),
        }
    }
}
