//! The response value handlers fill in.
//!
//! [`RestResponse`] accumulates status, headers and an arbitrary
//! serializable body; nothing touches the wire until the session converts it
//! into a [`WireResponse`] with [`RestResponse::into_wire`]. That conversion
//! consumes the response, which is what makes writing a one-shot operation.

use bytes::Bytes;
use http::{HeaderName, HeaderValue, StatusCode, header};
use serde::Serialize;
use serde_json::Value;

use super::SendError;

/// Content type emitted for every JSON response body.
pub const APPLICATION_JSON_UTF8: &str = "application/json; charset=UTF-8";

/// A response under construction. Exactly one exists per request cycle.
#[derive(Debug, Default)]
pub struct RestResponse {
    status: Option<StatusCode>,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Option<Value>,
}

impl RestResponse {
    pub fn new() -> Self {
        Default::default()
    }

    /// The explicitly set status, if any. When unset, the session falls back
    /// to the request's failure status (or `200 OK` for a normal cycle).
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    /// Appends a header. Headers keep insertion order on the wire.
    pub fn add_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.push((name, value));
    }

    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    /// Stores the body as a JSON value; it is serialized to bytes only at
    /// write time.
    pub fn set_body<T: Serialize + ?Sized>(&mut self, body: &T) -> Result<(), serde_json::Error> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(())
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Resolves the response into its wire form: serializes the body, forces
    /// the body headers when a body is present, and always stamps the
    /// `Connection` header from the close decision. Consuming `self` here is
    /// what prevents a response from being written twice.
    pub(crate) fn into_wire(self, fallback_status: StatusCode, close: bool) -> Result<WireResponse, SendError> {
        let status = self.status.unwrap_or(fallback_status);
        let mut headers = self.headers;

        let body = match self.body {
            Some(value) => Some(Bytes::from(serde_json::to_vec(&value)?)),
            None => None,
        };

        if let Some(bytes) = &body {
            upsert(&mut headers, header::CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON_UTF8));
            upsert(&mut headers, header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        }

        let connection = if close { "close" } else { "keep-alive" };
        upsert(&mut headers, header::CONNECTION, HeaderValue::from_static(connection));

        Ok(WireResponse { status, headers, body })
    }
}

/// Replaces an existing header in place, preserving its position, or appends
/// it at the end.
fn upsert(headers: &mut Vec<(HeaderName, HeaderValue)>, name: HeaderName, value: HeaderValue) {
    match headers.iter_mut().find(|(existing, _)| *existing == name) {
        Some((_, existing_value)) => *existing_value = value,
        None => headers.push((name, value)),
    }
}

/// A fully resolved response, ready for the encoder.
#[derive(Debug)]
pub struct WireResponse {
    pub(crate) status: StatusCode,
    pub(crate) headers: Vec<(HeaderName, HeaderValue)>,
    pub(crate) body: Option<Bytes>,
}

impl WireResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }
}
