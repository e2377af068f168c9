use std::collections::HashMap;

use crate::{BrokerProperties, BROKER_PROPERTIES_HEADER};

pub(crate) fn broker_properties(headers: &[(String, String)]) -> BrokerProperties {
    let Some((_, raw)) = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(BROKER_PROPERTIES_HEADER))
    else {
        log::debug!("Response carries no `{BROKER_PROPERTIES_HEADER}` header");
        return BrokerProperties::default();
    };

    let deserializer = &mut serde_json::Deserializer::from_str(raw);
    match serde_path_to_error::deserialize(deserializer) {
        Ok(properties) => properties,
        Err(e) => {
            log::warn!(
                "Ignoring malformed `{BROKER_PROPERTIES_HEADER}` at `{}`: {}",
                e.path(),
                e.inner()
            );
            BrokerProperties::default()
        }
    }
}

/// Application properties arrive as headers whose values are JSON string literals,
/// e.g. `Priority: "High"`; standard HTTP headers are never quoted.
pub(crate) fn user_properties(headers: &[(String, String)]) -> HashMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case(BROKER_PROPERTIES_HEADER))
        .filter(|(_, value)| value.len() >= 2 && value.starts_with('"') && value.ends_with('"'))
        .filter_map(|(name, value)| {
            serde_json::from_str::<String>(value)
                .ok()
                .map(|value| (name.clone(), value))
        })
        .collect()
}
