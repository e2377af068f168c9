use std::io::{self, Write};

use serde::Serialize as _;
use serde_json::{ser::Formatter, Value};
use servicebus_client::BodyError;

#[derive(thiserror::Error, Debug)]
pub enum PrintError {
    #[error("{0}")]
    Body(#[from] BodyError),

    #[error("Message body is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("Expected a JSON object but found {0}")]
    NotAnObject(&'static str),
}

/// Single-line JSON with a space after every `:` and `,`.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        writer.write_all(b": ")
    }
}

/// Decodes `body` as a UTF-8 JSON object and renders it on one line.
pub fn render(body: &[u8]) -> Result<String, PrintError> {
    let text = std::str::from_utf8(body)?;
    let value: Value = serde_json::from_str(text)?;

    let kind = match &value {
        Value::Object(_) => None,
        Value::Array(_) => Some("an array"),
        Value::String(_) => Some("a string"),
        Value::Number(_) => Some("a number"),
        Value::Bool(_) => Some("a boolean"),
        Value::Null => Some("null"),
    };
    if let Some(kind) = kind {
        return Err(PrintError::NotAnObject(kind));
    }

    let mut rendered = Vec::with_capacity(body.len() + 16);
    let mut serializer = serde_json::Serializer::with_formatter(&mut rendered, SpacedFormatter);
    value.serialize(&mut serializer)?;

    String::from_utf8(rendered).map_err(|e| PrintError::Utf8(e.utf8_error()))
}

/// Writes one delivered message, or the reason it could not be read.
///
/// A failure to read or decode the body is reported inline and never returned;
/// only failures to write to `out` are.
pub fn print_message<W: Write>(out: &mut W, body: Result<&[u8], &BodyError>) -> io::Result<()> {
    let rendered = body.map_err(|e| PrintError::Body(e.clone())).and_then(render);
    match rendered {
        Ok(json) => writeln!(out, "Got msg: {json}\n")?,
        Err(e) => writeln!(out, "*** Error reading individual message: {e}")?,
    }
    out.flush()
}
