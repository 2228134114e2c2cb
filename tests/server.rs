//! End-to-end tests over a real TCP socket: raw HTTP/1.1 bytes in, raw
//! bytes out, exercising the full accept-dispatch-respond path.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use micro_rest::fault::{ANY_ERROR, FaultHandler, FaultKind, FaultResolver, HandlerFault};
use micro_rest::handler::Handler;
use micro_rest::protocol::{RestRequest, RestResponse};
use micro_rest::router::Router;
use micro_rest::server::{Server, ServerContext, ServerHandle};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::sleep;

static LOOKUP_ERROR: FaultKind = FaultKind::new("lookup-error", &ANY_ERROR);

struct Hello;

#[async_trait]
impl Handler for Hello {
    async fn call(&self, _request: &mut RestRequest, response: &mut RestResponse) -> Result<(), HandlerFault> {
        response.set_body(&json!({"message": "Hello, World!"}))?;
        Ok(())
    }
}

struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn call(&self, request: &mut RestRequest, response: &mut RestResponse) -> Result<(), HandlerFault> {
        response.set_body(request.body().unwrap_or(&Value::Null))?;
        Ok(())
    }
}

struct Lookup;

#[async_trait]
impl Handler for Lookup {
    async fn call(&self, request: &mut RestRequest, response: &mut RestResponse) -> Result<(), HandlerFault> {
        let id = request.path_param("id").unwrap_or_default().to_owned();
        if id != "42" {
            return Err(HandlerFault::new(&LOOKUP_ERROR, format!("no user {id}")));
        }
        response.set_body(&json!({"id": id, "name": "Douglas"}))?;
        Ok(())
    }
}

struct MapToNotFound;

#[async_trait]
impl FaultHandler for MapToNotFound {
    async fn handle(
        &self,
        fault: &HandlerFault,
        _request: &mut RestRequest,
        response: &mut RestResponse,
        server: &ServerContext,
    ) -> Result<(), HandlerFault> {
        assert!(server.is_running());
        response.set_status(StatusCode::NOT_FOUND);
        response.set_body(&json!({ "error": fault.message() }))?;
        Ok(())
    }
}

async fn start() -> (SocketAddr, ServerHandle) {
    let router = Router::builder()
        .get("/hello", Hello)
        .get("/user/{id}", Lookup)
        .post("/echo", Echo)
        .build()
        .unwrap();
    let faults = FaultResolver::builder().on(&LOOKUP_ERROR, MapToNotFound).build();

    let mut server = Server::builder()
        .address("127.0.0.1:0")
        .router(router)
        .faults(faults)
        .shutdown_grace(Duration::from_secs(1))
        .build()
        .unwrap();

    let address = server.bind().unwrap();
    let handle = server.handle();
    tokio::spawn(server.run());
    (address, handle)
}

/// Sends raw bytes on a fresh connection and reads until the server closes.
async fn send(address: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(address).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

fn body_of(response: &str) -> &str {
    response.split_once("\r\n\r\n").map(|(_, body)| body).unwrap_or("")
}

#[tokio::test]
async fn test_hello_world_round_trip() {
    let (address, _handle) = start().await;
    let response = send(address, "GET /hello HTTP/1.1\r\nHost: localhost\r\n\r\n").await;

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(response.contains("content-type: application/json; charset=UTF-8\r\n"));
    assert!(response.contains("connection: close\r\n"));
    assert_eq!(body_of(&response), r#"{"message":"Hello, World!"}"#);
}

#[tokio::test]
async fn test_path_parameter_and_fault_mapping() {
    let (address, _handle) = start().await;

    let found = send(address, "GET /user/42 HTTP/1.1\r\n\r\n").await;
    assert!(found.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body_of(&found), r#"{"id":"42","name":"Douglas"}"#);

    let missing = send(address, "GET /user/7 HTTP/1.1\r\n\r\n").await;
    assert!(missing.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert_eq!(body_of(&missing), r#"{"error":"no user 7"}"#);
}

#[tokio::test]
async fn test_post_body_is_echoed() {
    let (address, _handle) = start().await;
    let body = r#"{"answer":42}"#;
    let request = format!("POST /echo HTTP/1.1\r\nContent-Length: {}\r\n\r\n{}", body.len(), body);

    let response = send(address, &request).await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body_of(&response), body);
}

#[tokio::test]
async fn test_protocol_rejections() {
    let (address, _handle) = start().await;

    let not_found = send(address, "GET /nowhere HTTP/1.1\r\n\r\n").await;
    assert!(not_found.starts_with("HTTP/1.1 404 Not Found\r\n"));

    let wrong_method = send(address, "POST /hello HTTP/1.1\r\n\r\n").await;
    assert!(wrong_method.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));

    let garbage = send(address, "GET /hello\r\n\r\n").await;
    assert!(garbage.starts_with("HTTP/1.1 400 Bad Request\r\n"));

    let no_length = send(address, "POST /echo HTTP/1.1\r\n\r\n").await;
    assert!(no_length.starts_with("HTTP/1.1 411 Length Required\r\n"));

    let too_large = send(address, "POST /echo HTTP/1.1\r\nContent-Length: 4096\r\n\r\n").await;
    assert!(too_large.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
}

#[tokio::test]
async fn test_keep_alive_serves_two_requests_on_one_connection() {
    let (address, _handle) = start().await;
    let keep_alive = "GET /hello HTTP/1.1\r\nConnection: keep-alive\r\n\r\n";
    let closing = "GET /hello HTTP/1.1\r\n\r\n";

    let mut stream = TcpStream::connect(address).await.unwrap();
    stream.write_all(keep_alive.as_bytes()).await.unwrap();
    stream.write_all(closing.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert_eq!(response.matches("HTTP/1.1 200 OK").count(), 2);
    assert!(response.contains("connection: keep-alive\r\n"));
    assert!(response.contains("connection: close\r\n"));
}

#[tokio::test]
async fn test_graceful_shutdown_stops_accepting() {
    let (address, handle) = start().await;

    // make sure the server is actually serving before shutting it down
    let response = send(address, "GET /hello HTTP/1.1\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));

    handle.shutdown().await;

    // the listener closes shortly after the accept loop observes the cancel
    for _ in 0..40 {
        if TcpStream::connect(address).await.is_err() {
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("server kept accepting after shutdown");
}
