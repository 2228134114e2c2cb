//! The parsed request value handed to handlers.
//!
//! A [`RestRequest`] is built up by the request decoder over one keep-alive
//! cycle: request line first, then headers, then the optional JSON body.
//! Requests that fail protocol checks are still materialized, carrying the
//! failure [`StatusCode`] and no resolved endpoint, so the session can write
//! a bare status back before closing.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::header::AsHeaderName;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::router::Endpoint;

/// One HTTP request, mutable until dispatch, discarded after the response is
/// written.
#[derive(Debug)]
pub struct RestRequest {
    method: Option<Method>,
    path: String,
    query_string: Option<String>,
    headers: HeaderMap,
    path_params: HashMap<String, String>,
    query: HashMap<String, Vec<String>>,
    raw_body: Option<Bytes>,
    body: Option<Value>,
    status: StatusCode,
    endpoint: Option<Arc<Endpoint>>,
    close_connection: bool,
}

impl RestRequest {
    /// A request whose route resolved successfully; headers and body are
    /// still to come.
    pub(crate) fn matched(method: Method, path: &str, query_string: Option<&str>, endpoint: Arc<Endpoint>) -> Self {
        Self {
            method: Some(method),
            path: path.to_string(),
            query_string: query_string.map(str::to_string),
            headers: HeaderMap::new(),
            path_params: HashMap::new(),
            query: HashMap::new(),
            raw_body: None,
            body: None,
            status: StatusCode::OK,
            endpoint: Some(endpoint),
            close_connection: true,
        }
    }

    /// A request that failed a protocol check before dispatch. It carries
    /// only the failure status; the connection will close after the status
    /// line is written.
    pub(crate) fn rejected(status: StatusCode) -> Self {
        Self {
            method: None,
            path: String::new(),
            query_string: None,
            headers: HeaderMap::new(),
            path_params: HashMap::new(),
            query: HashMap::new(),
            raw_body: None,
            body: None,
            status,
            endpoint: None,
            close_connection: true,
        }
    }

    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Looks up a header value as a string. Header names are
    /// case-insensitive; for duplicate keys the last value wins.
    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Path parameter captured by the matched route pattern.
    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    /// All values seen for one query key, in the order they appeared.
    pub fn query(&self, key: &str) -> Option<&[String]> {
        self.query.get(key).map(Vec::as_slice)
    }

    pub fn query_map(&self) -> &HashMap<String, Vec<String>> {
        &self.query
    }

    /// The request body decoded as an untyped JSON value, if one was sent.
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Re-decodes the raw body bytes into a concrete type. A request without
    /// a body decodes as JSON `null`, so `Option<T>` targets map it to `None`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(self.raw_body.as_deref().unwrap_or(b"null"))
    }

    /// The failure status assigned during parsing, `200 OK` when the request
    /// is dispatchable.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn close_connection(&self) -> bool {
        self.close_connection
    }

    /// Forces the connection to close after this cycle. Handlers may call
    /// this; the session also sets it on the last allowed keep-alive cycle.
    pub fn set_close_connection(&mut self, close: bool) {
        self.close_connection = close;
    }

    pub fn endpoint(&self) -> Option<&Arc<Endpoint>> {
        self.endpoint.as_ref()
    }

    pub(crate) fn take_endpoint(&mut self) -> Option<Arc<Endpoint>> {
        self.endpoint.take()
    }

    pub(crate) fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub(crate) fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        // last-wins for duplicate keys
        self.headers.insert(name, value);
    }

    pub(crate) fn set_raw_body(&mut self, raw: Bytes) {
        self.raw_body = Some(raw);
    }

    pub(crate) fn set_body_value(&mut self, body: Value) {
        self.body = Some(body);
    }

    pub(crate) fn set_path_params(&mut self, params: HashMap<String, String>) {
        self.path_params = params;
    }

    pub(crate) fn set_query(&mut self, query: HashMap<String, Vec<String>>) {
        self.query = query;
    }
}

/// Splits a query string on `&` then on the first `=`, percent-decoding both
/// sides. Repeated keys accumulate their values in order; a bare key maps to
/// an empty value.
pub(crate) fn parse_query_string(query_string: &str) -> HashMap<String, Vec<String>> {
    let mut query: HashMap<String, Vec<String>> = HashMap::new();

    if query_string.is_empty() {
        return query;
    }

    for pair in query_string.split('&') {
        let (key, value) = match pair.split_once('=') {
            Some((key, value)) => (key, value),
            None => (pair, ""),
        };
        query.entry(decode_component(key)).or_default().push(decode_component(value));
    }

    query
}

fn decode_component(raw: &str) -> String {
    urlencoding::decode(raw).map(Cow::into_owned).unwrap_or_else(|_| raw.to_string())
}
