//! A small asynchronous REST server
//!
//! This crate provides a lightweight JSON-over-HTTP/1.1 server built on top
//! of tokio. Routes are declared as method plus path template, handlers
//! receive a parsed request and fill in a response, and the server takes
//! care of the wire protocol, keep-alive and error mapping.
//!
//! # Features
//!
//! - Path templates with named parameters (`/user/{id}`)
//! - Query string parsing with repeated keys and percent-decoding
//! - JSON request and response bodies via serde
//! - Keep-alive connections with a per-connection cycle cap
//! - Fault handlers matched by a typed fault ancestry
//! - Bounded worker pool and graceful shutdown
//!
//! # Example
//!
//! ```no_run
//! use async_trait::async_trait;
//! use micro_rest::fault::HandlerFault;
//! use micro_rest::handler::Handler;
//! use micro_rest::protocol::{RestRequest, RestResponse};
//! use micro_rest::router::Router;
//! use micro_rest::server::Server;
//! use serde_json::json;
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl Handler for Hello {
//!     async fn call(&self, request: &mut RestRequest, response: &mut RestResponse) -> Result<(), HandlerFault> {
//!         let name = request.path_param("name").unwrap_or("World").to_owned();
//!         response.set_body(&json!({ "message": format!("Hello, {name}!") }))?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let router = Router::builder()
//!         .get("/hello", Hello)
//!         .get("/hello/{name}", Hello)
//!         .build()
//!         .unwrap();
//!
//!     let server = Server::builder()
//!         .address("127.0.0.1:8080")
//!         .router(router)
//!         .build()
//!         .unwrap();
//!
//!     server.run().await.unwrap();
//! }
//! ```
//!
//! # Architecture
//!
//! - [`router`]: route declaration, path templates and resolution
//! - [`handler`]: the endpoint handler trait
//! - [`protocol`]: request/response values and error types
//! - [`codec`]: request decoding and response encoding
//! - [`connection`]: the per-connection keep-alive session
//! - [`fault`]: fault kinds and fault handler dispatch
//! - [`server`]: configuration, the accept loop and shutdown
//!
//! # Error Handling
//!
//! Client mistakes never surface as Rust errors: a malformed request line,
//! an unknown route, a missing `Content-Length` or an undecodable JSON body
//! are answered with the matching status code (`400`, `404`/`405`, `411`,
//! `415`) and the connection is closed. [`protocol::HttpError`] covers only
//! stream-level failures.
//!
//! Handler failures are [`fault::HandlerFault`] values carrying a
//! [`fault::FaultKind`]. Registered [`fault::FaultHandler`]s are matched by
//! exact kind first, then by the nearest non-generic ancestor, then by a
//! generic catch-all; an unhandled fault drops the connection.
//!
//! # Limitations
//!
//! - HTTP/1.1 only, no chunked transfer encoding
//! - JSON bodies only, with a configurable size cap (64 KiB ceiling)
//! - No TLS support (use a reverse proxy for HTTPS)

pub mod codec;
pub mod connection;
pub mod fault;
pub mod handler;
pub mod protocol;
pub mod router;
pub mod server;

mod utils;
pub(crate) use utils::ensure;
