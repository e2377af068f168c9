use memchr::memmem;

/// `^[a-zA-Z0-9_\-.]+$`
pub fn is_valid_entity_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
}

/// `^Endpoint.+SharedAccessKeyName.+SharedAccessKey.+=$`
///
/// Each `.+` must cover at least one byte and, like a regex `.`, may not
/// contain a line feed. The end anchor does not accept a trailing line feed
/// either.
pub fn has_connection_string_shape(candidate: &str) -> bool {
    const MARKERS: [&[u8]; 3] = [b"Endpoint", b"SharedAccessKeyName", b"SharedAccessKey"];

    let bytes = candidate.as_bytes();
    if bytes.contains(&b'\n') || !bytes.starts_with(MARKERS[0]) || !bytes.ends_with(b"=") {
        return false;
    }

    // Taking the leftmost occurrence of every marker leaves the most room for the rest.
    let mut cursor = MARKERS[0].len();
    for marker in &MARKERS[1..] {
        let from = cursor + 1;
        let Some(found) = bytes.get(from..).and_then(|rest| memmem::find(rest, marker)) else {
            return false;
        };
        cursor = from + found + marker.len();
    }

    // At least one byte between the last marker and the trailing `=`
    bytes.len() >= cursor + 2
}
