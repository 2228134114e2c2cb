//! HTTP response encoder.
//!
//! Serializes a [`WireResponse`] into an HTTP/1.1 message: status line,
//! headers in their stored order, a blank line, then the body bytes if any.

use std::io::Write;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::Encoder;

use crate::protocol::{SendError, WireResponse};

#[derive(Debug, Default)]
pub struct ResponseEncoder;

impl Encoder<WireResponse> for ResponseEncoder {
    type Error = SendError;

    fn encode(&mut self, response: WireResponse, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let status = response.status();
        write!(
            FastWrite(dst),
            "HTTP/1.1 {} {}\r\n",
            status.as_str(),
            status.canonical_reason().unwrap_or("Unknown Status"),
        )
        .map_err(SendError::io)?;

        for (name, value) in &response.headers {
            dst.put_slice(name.as_str().as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");

        if let Some(body) = &response.body {
            dst.put_slice(body);
        }
        Ok(())
    }
}

/// `io::Write` shim over `BytesMut` so `write!` can target the buffer
/// without an intermediate `String`.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RestResponse;
    use http::StatusCode;
    use serde_json::json;

    fn encode(response: WireResponse) -> String {
        let mut buf = BytesMut::new();
        ResponseEncoder.encode(response, &mut buf).unwrap();
        String::from_utf8(buf.to_vec()).unwrap()
    }

    #[test]
    fn test_status_only_response() {
        let wire = RestResponse::new().into_wire(StatusCode::NOT_FOUND, true).unwrap();
        assert_eq!(encode(wire), "HTTP/1.1 404 Not Found\r\nconnection: close\r\n\r\n");
    }

    #[test]
    fn test_response_with_body() {
        let mut response = RestResponse::new();
        response.set_body(&json!({"ok": true})).unwrap();
        let wire = response.into_wire(StatusCode::OK, false).unwrap();

        assert_eq!(
            encode(wire),
            "HTTP/1.1 200 OK\r\n\
             content-type: application/json; charset=UTF-8\r\n\
             content-length: 11\r\n\
             connection: keep-alive\r\n\
             \r\n\
             {\"ok\":true}",
        );
    }
}
