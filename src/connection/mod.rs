//! One connection, one session.
//!
//! [`ConnectionSession`] drives the keep-alive loop over a framed
//! reader/writer pair: decode a request, dispatch its endpoint handler,
//! write exactly one response, and either loop or close. The loop ends when
//! the close decision says so, the client goes away, the cycle cap is
//! reached, or a fault is left unhandled.
//!
//! The session is generic over the byte stream, so tests run it over an
//! in-memory duplex pipe instead of a TCP socket.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{error, trace, warn};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::protocol::{HttpError, RestResponse};
use crate::server::ServerShared;

const READ_BUFFER_SIZE: usize = 8 * 1024;

pub struct ConnectionSession<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
    shared: Arc<ServerShared>,
}

impl<R, W> ConnectionSession<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, shared: Arc<ServerShared>) -> Self {
        let decoder = RequestDecoder::new(Arc::clone(shared.router()), shared.context().config().max_body_size);
        Self {
            framed_read: FramedRead::with_capacity(reader, decoder, READ_BUFFER_SIZE),
            framed_write: FramedWrite::new(writer, ResponseEncoder),
            shared,
        }
    }

    /// Serves the connection to completion, then shuts the write side down.
    pub async fn process(mut self) -> Result<(), HttpError> {
        let result = self.run_cycles().await;
        self.shutdown().await;
        result
    }

    async fn run_cycles(&mut self) -> Result<(), HttpError> {
        let max_cycles = self.shared.context().config().max_keep_alive_cycles;

        for cycle in 1..=max_cycles {
            let mut request = match self.framed_read.next().await {
                Some(Ok(request)) => request,
                Some(Err(e)) => {
                    error!(cause = %e, "failed to read request");
                    // best effort: the stream may already be unusable
                    let _ = self.write(RestResponse::new(), StatusCode::BAD_REQUEST, true).await;
                    return Err(e.into());
                }
                None => {
                    trace!("client closed the connection");
                    break;
                }
            };

            // protocol-level rejection decided by the decoder
            if request.status() != StatusCode::OK {
                self.write(RestResponse::new(), request.status(), true).await?;
                break;
            }

            if cycle == max_cycles {
                request.set_close_connection(true);
            }

            let Some(endpoint) = request.take_endpoint() else {
                self.write(RestResponse::new(), StatusCode::NOT_FOUND, true).await?;
                break;
            };

            let mut response = RestResponse::new();
            match endpoint.handler().call(&mut request, &mut response).await {
                Ok(()) => {
                    // read after dispatch, so a handler can force a close;
                    // the cycle cap cannot be un-forced
                    let close = request.close_connection() || cycle == max_cycles;
                    self.write(response, StatusCode::OK, close).await?;
                    if close {
                        break;
                    }
                }
                Err(fault) => {
                    warn!(path = request.path(), fault = %fault, "handler fault");
                    let handled =
                        self.shared.resolver().dispatch(&fault, &mut request, &mut response, self.shared.context()).await;
                    if handled {
                        self.write(response, StatusCode::INTERNAL_SERVER_ERROR, true).await?;
                    }
                    // faulted cycles always close, handled or not
                    break;
                }
            }
        }

        Ok(())
    }

    async fn write(&mut self, response: RestResponse, fallback: StatusCode, close: bool) -> Result<(), HttpError> {
        let wire = response.into_wire(fallback, close)?;
        trace!(status = %wire.status(), close, "writing response");
        self.framed_write.send(wire).await?;
        Ok(())
    }

    async fn shutdown(&mut self) {
        let _ = self.framed_write.get_mut().shutdown().await;
    }
}

impl<R, W> std::fmt::Debug for ConnectionSession<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession").finish_non_exhaustive()
    }
}
