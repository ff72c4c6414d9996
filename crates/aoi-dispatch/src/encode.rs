//! Content-type driven request body encoding.
//!
//! A small strategy table maps the declared (or inferred) Content-Type to an
//! encoder; unknown types fall back to JSON. Event-stream and NDJSON bodies
//! pass through untouched.

use reqwest::RequestBuilder;
use reqwest::multipart::Form;
use serde_json::Value;

use crate::errors::DispatchError;

/// Encoder family resolved from a Content-Type value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyEncoding {
    Json,
    Form,
    Multipart,
    Text,
    Passthrough,
}

/// Strategy table. First match on the media-type prefix wins.
const ENCODINGS: &[(&str, BodyEncoding)] = &[
    ("application/json", BodyEncoding::Json),
    ("application/x-www-form-urlencoded", BodyEncoding::Form),
    ("multipart/form-data", BodyEncoding::Multipart),
    ("text/plain", BodyEncoding::Text),
    ("text/event-stream", BodyEncoding::Passthrough),
    ("application/x-ndjson", BodyEncoding::Passthrough),
];

/// Resolve the encoding for a Content-Type header value. `None` or an
/// unknown type means JSON.
pub fn resolve_encoding(content_type: Option<&str>) -> BodyEncoding {
    let Some(content_type) = content_type else {
        return BodyEncoding::Json;
    };
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    ENCODINGS
        .iter()
        .find(|(prefix, _)| media_type == *prefix)
        .map(|(_, encoding)| *encoding)
        .unwrap_or(BodyEncoding::Json)
}

/// Attach the abstract body to the outbound request using the resolved
/// encoder.
pub fn apply_body(
    builder: RequestBuilder,
    content_type: Option<&str>,
    body: &Value,
) -> Result<RequestBuilder, DispatchError> {
    match resolve_encoding(content_type) {
        BodyEncoding::Json => Ok(builder.json(body)),
        BodyEncoding::Form => Ok(builder.form(&flatten_fields(body)?)),
        BodyEncoding::Multipart => {
            let mut form = Form::new();
            for (name, value) in flatten_fields(body)? {
                form = form.text(name, value);
            }
            Ok(builder.multipart(form))
        }
        BodyEncoding::Text => Ok(builder
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(scalar_to_string(body))),
        BodyEncoding::Passthrough => {
            let mut builder = builder;
            if let Some(content_type) = content_type {
                builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
            }
            Ok(builder.body(scalar_to_string(body)))
        }
    }
}

/// Flatten a JSON object into string form fields. Non-object bodies cannot
/// be form-encoded.
fn flatten_fields(body: &Value) -> Result<Vec<(String, String)>, DispatchError> {
    let Value::Object(map) = body else {
        return Err(DispatchError::InvalidRequest(
            "form-encoded body must be a JSON object".to_string(),
        ));
    };
    Ok(map
        .iter()
        .map(|(key, value)| (key.clone(), scalar_to_string(value)))
        .collect())
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Substitute `{name}` and `:name` placeholders in a URL path.
pub fn substitute_path_params(
    url: &str,
    params: &std::collections::BTreeMap<String, String>,
) -> String {
    let mut resolved = url.to_string();
    for (name, value) in params {
        resolved = resolved.replace(&format!("{{{name}}}"), value);
        resolved = resolved.replace(&format!(":{name}"), value);
    }
    resolved
}
