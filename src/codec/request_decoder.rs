//! HTTP request decoder.
//!
//! [`RequestDecoder`] reads one request per keep-alive cycle off a byte
//! stream, as a three-state machine:
//!
//! 1. `RequestLine`: `<method> <target> <version>`, split on single spaces.
//!    The route is resolved here, before headers are read, so an
//!    unroutable request is rejected without consuming the rest of it.
//! 2. `Headers`: `key: value` lines until a blank line, last value winning
//!    for duplicate keys.
//! 3. `Body`: exactly `Content-Length` bytes, decoded through the JSON
//!    codec.
//!
//! Client-visible failures (bad request line, unknown route, missing
//! length, oversized or undecodable body) are yielded as [`RestRequest`]
//! values carrying the failure status, so the session can still answer with
//! a status line. Only stream-level problems (I/O errors, a line exceeding
//! the size ceiling) are decoder errors.
//!
//! Lines end with `\r\n`; a bare `\n` is tolerated.

use std::mem;
use std::sync::Arc;

use bytes::BytesMut;
use http::header::{CONNECTION, CONTENT_LENGTH};
use http::{HeaderName, HeaderValue, Method, StatusCode};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, RestRequest, parse_query_string};
use crate::router::{RouteOutcome, Router};

/// Ceiling for a single request or header line.
const MAX_LINE_BYTES: usize = 8 * 1024;

/// Decoder for one connection. Holds the shared routing table so route
/// resolution happens during the parse, and the configured body-size cap.
#[derive(Debug)]
pub struct RequestDecoder {
    router: Arc<Router>,
    max_body_size: usize,
    state: DecodeState,
}

#[derive(Debug)]
enum DecodeState {
    RequestLine,
    Headers(Box<RestRequest>),
    Body { request: Box<RestRequest>, content_length: usize },
}

impl RequestDecoder {
    pub fn new(router: Arc<Router>, max_body_size: usize) -> Self {
        Self { router, max_body_size, state: DecodeState::RequestLine }
    }

    fn take_state(&mut self) -> DecodeState {
        mem::replace(&mut self.state, DecodeState::RequestLine)
    }

    /// Parses the request line and resolves the route. On failure returns
    /// the status the client should see.
    fn begin_request(&self, line: &[u8]) -> Result<RestRequest, StatusCode> {
        let text = std::str::from_utf8(line).map_err(|_| StatusCode::BAD_REQUEST)?;

        let mut tokens = text.split(' ');
        let (Some(method), Some(target), Some(_version)) = (tokens.next(), tokens.next(), tokens.next()) else {
            return Err(StatusCode::BAD_REQUEST);
        };

        let method = parse_method(method).ok_or(StatusCode::BAD_REQUEST)?;

        let (path, query_string) = match target.split_once('?') {
            Some((path, query_string)) => (path, Some(query_string)),
            None => (target, None),
        };

        match self.router.resolve(&method, path) {
            RouteOutcome::Found(endpoint) => Ok(RestRequest::matched(method, path, query_string, endpoint)),
            RouteOutcome::MethodNotAllowed => Err(StatusCode::METHOD_NOT_ALLOWED),
            RouteOutcome::NotFound => Err(StatusCode::NOT_FOUND),
        }
    }

    /// Fills in everything that needs the complete head and body: keep-alive
    /// intent, path parameters and query parameters.
    fn finish(&self, mut request: RestRequest) -> RestRequest {
        let keep_alive = request
            .headers()
            .get(CONNECTION)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("keep-alive"));
        request.set_close_connection(!keep_alive);

        if let Some(endpoint) = request.endpoint().map(Arc::clone)
            && let Some(params) = endpoint.template().capture(endpoint.method(), request.path())
        {
            request.set_path_params(params);
        }

        if let Some(query_string) = request.query_string().map(str::to_owned) {
            request.set_query(parse_query_string(&query_string));
        }

        trace!(path = request.path(), close = request.close_connection(), "decoded request");
        request
    }
}

impl Decoder for RequestDecoder {
    type Item = RestRequest;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.take_state() {
                DecodeState::RequestLine => {
                    let Some(line) = take_line(src)? else {
                        return Ok(None);
                    };
                    match self.begin_request(&line) {
                        Ok(request) => self.state = DecodeState::Headers(Box::new(request)),
                        Err(status) => return Ok(Some(RestRequest::rejected(status))),
                    }
                }

                DecodeState::Headers(mut request) => {
                    let Some(line) = take_line(src)? else {
                        self.state = DecodeState::Headers(request);
                        return Ok(None);
                    };

                    if !line.is_empty() {
                        store_header(&mut request, &line);
                        self.state = DecodeState::Headers(request);
                        continue;
                    }

                    match body_length(&request) {
                        Err(status) => {
                            request.set_status(status);
                            return Ok(Some(*request));
                        }
                        Ok(0) => return Ok(Some(self.finish(*request))),
                        // compared in u64: a length that would not even fit
                        // usize must still reject, not wrap
                        Ok(length) if length > self.max_body_size as u64 => {
                            // rejected before any body byte is read
                            request.set_status(StatusCode::PAYLOAD_TOO_LARGE);
                            return Ok(Some(*request));
                        }
                        Ok(length) => {
                            let length = length as usize;
                            src.reserve(length.saturating_sub(src.len()));
                            self.state = DecodeState::Body { request, content_length: length };
                        }
                    }
                }

                DecodeState::Body { mut request, content_length } => {
                    if src.len() < content_length {
                        self.state = DecodeState::Body { request, content_length };
                        return Ok(None);
                    }

                    let raw = src.split_to(content_length).freeze();
                    match serde_json::from_slice(&raw) {
                        Ok(value) => {
                            request.set_raw_body(raw);
                            request.set_body_value(value);
                            return Ok(Some(self.finish(*request)));
                        }
                        Err(_) => {
                            request.set_status(StatusCode::UNSUPPORTED_MEDIA_TYPE);
                            return Ok(Some(*request));
                        }
                    }
                }
            }
        }
    }
}

/// Splits the next line off `src`, stripping the terminator. `None` means
/// more data is needed; an unterminated line beyond the ceiling is a hard
/// error.
fn take_line(src: &mut BytesMut) -> Result<Option<BytesMut>, ParseError> {
    match src.iter().position(|&b| b == b'\n') {
        Some(position) => {
            let mut line = src.split_to(position + 1);
            line.truncate(position);
            if line.last() == Some(&b'\r') {
                let len = line.len();
                line.truncate(len - 1);
            }
            Ok(Some(line))
        }
        None => {
            ensure!(src.len() <= MAX_LINE_BYTES, ParseError::too_long_line(src.len(), MAX_LINE_BYTES));
            Ok(None)
        }
    }
}

/// The recognized method tokens, case-sensitive.
fn parse_method(token: &str) -> Option<Method> {
    match token {
        "GET" => Some(Method::GET),
        "POST" => Some(Method::POST),
        "PUT" => Some(Method::PUT),
        "DELETE" => Some(Method::DELETE),
        "PATCH" => Some(Method::PATCH),
        "HEAD" => Some(Method::HEAD),
        "OPTIONS" => Some(Method::OPTIONS),
        _ => None,
    }
}

/// Splits a header line on the first colon, trimming both sides. Lines
/// without a colon and unparsable names or values are skipped.
fn store_header(request: &mut RestRequest, line: &[u8]) {
    let Ok(text) = std::str::from_utf8(line) else {
        return;
    };
    let Some((key, value)) = text.split_once(':') else {
        return;
    };
    let Ok(name) = HeaderName::from_bytes(key.trim().as_bytes()) else {
        return;
    };
    let Ok(value) = HeaderValue::from_str(value.trim()) else {
        return;
    };
    request.insert_header(name, value);
}

/// Content-length policy: a body-bearing method (POST/PUT) must announce a
/// parseable non-negative length, other methods default to no body. The
/// length stays `u64` so the size check never narrows first.
fn body_length(request: &RestRequest) -> Result<u64, StatusCode> {
    let announced = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());

    let body_bearing = matches!(request.method(), Some(&Method::POST) | Some(&Method::PUT));

    match announced {
        Some(length) => Ok(length),
        None if body_bearing => Err(StatusCode::LENGTH_REQUIRED),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::HandlerFault;
    use crate::handler::{BoxHandlerFuture, handler_fn};
    use crate::protocol::RestResponse;
    use indoc::indoc;

    fn noop<'a>(_request: &'a mut RestRequest, _response: &'a mut RestResponse) -> BoxHandlerFuture<'a> {
        Box::pin(async move { Ok::<(), HandlerFault>(()) })
    }

    fn decoder() -> RequestDecoder {
        let router = Router::builder()
            .get("/hello", handler_fn(noop))
            .get("/user/{id}", handler_fn(noop))
            .post("/echo", handler_fn(noop))
            .build()
            .unwrap();
        RequestDecoder::new(Arc::new(router), 1024)
    }

    fn decode_one(decoder: &mut RequestDecoder, input: &str) -> RestRequest {
        let mut buf = BytesMut::from(input);
        decoder.decode(&mut buf).unwrap().expect("expected a complete request")
    }

    #[test]
    fn test_simple_get() {
        let request = decode_one(
            &mut decoder(),
            indoc! {r"
            GET /hello HTTP/1.1
            Host: 127.0.0.1:8080
            Accept: */*

            "},
        );

        assert_eq!(request.status(), StatusCode::OK);
        assert_eq!(request.method(), Some(&Method::GET));
        assert_eq!(request.path(), "/hello");
        assert_eq!(request.header("host"), Some("127.0.0.1:8080"));
        assert!(request.endpoint().is_some());
        assert!(request.body().is_none());
        // no keep-alive header: default is to close
        assert!(request.close_connection());
    }

    #[test]
    fn test_incomplete_input_waits_for_more() {
        let mut decoder = decoder();
        let mut buf = BytesMut::from("GET /hello HT");

        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"TP/1.1\r\nConnection: keep-alive\r\n");
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"\r\n");
        let request = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(request.status(), StatusCode::OK);
        assert!(!request.close_connection());
    }

    #[test]
    fn test_two_token_request_line_is_bad_request() {
        let request = decode_one(&mut decoder(), "GET /hello\r\n");
        assert_eq!(request.status(), StatusCode::BAD_REQUEST);
        assert!(request.endpoint().is_none());
    }

    #[test]
    fn test_empty_request_line_is_bad_request() {
        let request = decode_one(&mut decoder(), "\r\n");
        assert_eq!(request.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unrecognized_method_is_bad_request() {
        let request = decode_one(&mut decoder(), "BREW /hello HTTP/1.1\r\n");
        assert_eq!(request.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unknown_path_is_not_found() {
        let request = decode_one(&mut decoder(), "GET /missing HTTP/1.1\r\n");
        assert_eq!(request.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_wrong_method_is_method_not_allowed() {
        let request = decode_one(&mut decoder(), "POST /hello HTTP/1.1\r\n");
        assert_eq!(request.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn test_post_without_content_length_is_length_required() {
        let request = decode_one(&mut decoder(), "POST /echo HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(request.status(), StatusCode::LENGTH_REQUIRED);
    }

    #[test]
    fn test_oversized_announcement_rejected_without_body_bytes() {
        // only the head is sent; the announced length alone must trigger 413
        let request = decode_one(&mut decoder(), "POST /echo HTTP/1.1\r\nContent-Length: 4096\r\n\r\n");
        assert_eq!(request.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_announcement_beyond_usize_still_rejected() {
        // 2^32 + 16: would wrap below the cap if narrowed to 32 bits first
        let input = "POST /echo HTTP/1.1\r\nContent-Length: 4294967312\r\n\r\n";
        let request = decode_one(&mut decoder(), input);
        assert_eq!(request.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_body_is_decoded_as_json() {
        let body = r#"{"name":"crab"}"#;
        let input = format!("POST /echo HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}", body.len(), body);
        let request = decode_one(&mut decoder(), &input);

        assert_eq!(request.status(), StatusCode::OK);
        assert_eq!(request.body().and_then(|v| v["name"].as_str()), Some("crab"));

        #[derive(serde::Deserialize)]
        struct Named {
            name: String,
        }
        let typed: Named = request.body_as().unwrap();
        assert_eq!(typed.name, "crab");
    }

    #[test]
    fn test_undecodable_body_is_unsupported_media_type() {
        let input = "POST /echo HTTP/1.1\r\nContent-Length: 9\r\n\r\nnot json!";
        let request = decode_one(&mut decoder(), input);
        assert_eq!(request.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn test_duplicate_headers_last_value_wins() {
        let input = "GET /hello HTTP/1.1\r\nX-Tag: first\r\nx-tag: second\r\n\r\n";
        let request = decode_one(&mut decoder(), input);
        assert_eq!(request.header("X-TAG"), Some("second"));
    }

    #[test]
    fn test_keep_alive_is_case_insensitive() {
        let input = "GET /hello HTTP/1.1\r\nConnection: Keep-Alive\r\n\r\n";
        let request = decode_one(&mut decoder(), input);
        assert!(!request.close_connection());
    }

    #[test]
    fn test_path_params_are_bound() {
        let request = decode_one(&mut decoder(), "GET /user/42 HTTP/1.1\r\n\r\n");
        assert_eq!(request.status(), StatusCode::OK);
        assert_eq!(request.path_param("id"), Some("42"));
    }

    #[test]
    fn test_query_params_are_decoded_and_accumulated() {
        let request = decode_one(&mut decoder(), "GET /hello?a=1&a=2&msg=hi%20there&flag HTTP/1.1\r\n\r\n");
        assert_eq!(request.query("a"), Some(&["1".to_string(), "2".to_string()][..]));
        assert_eq!(request.query("msg"), Some(&["hi there".to_string()][..]));
        assert_eq!(request.query("flag"), Some(&["".to_string()][..]));
        assert_eq!(request.query_string(), Some("a=1&a=2&msg=hi%20there&flag"));
    }

    #[test]
    fn test_pipelined_keep_alive_requests_decode_sequentially() {
        let mut decoder = decoder();
        let one = "GET /hello HTTP/1.1\r\nConnection: keep-alive\r\n\r\n";
        let mut buf = BytesMut::from(format!("{one}{one}").as_str());

        let first = decoder.decode(&mut buf).unwrap().unwrap();
        let second = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unterminated_long_line_is_a_hard_error() {
        let mut decoder = decoder();
        let mut buf = BytesMut::from(vec!["x"; MAX_LINE_BYTES + 2].concat().as_str());
        let result = decoder.decode(&mut buf);
        assert!(matches!(result, Err(ParseError::TooLongLine { .. })));
    }
}
