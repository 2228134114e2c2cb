//! Fault kinds and the three-tier fault resolver.
//!
//! Handler failures carry a [`FaultKind`], a static descriptor with an
//! explicit parent link. The kinds form an ancestry table fixed at
//! declaration time, which is what replaces runtime type-hierarchy
//! introspection: resolving a fault walks the table instead of inspecting
//! types.
//!
//! Resolution is strictly tiered, first match wins:
//!
//! 1. a handler registered for exactly the fault's kind,
//! 2. a handler registered for the nearest non-generic strict ancestor,
//! 3. the first registered handler for one of the generic markers
//!    ([`ANY_ERROR`], [`ANY_FAULT`]).
//!
//! When nothing matches, the fault is unhandled: the session writes nothing
//! and closes the connection. A fault raised *inside* a fault handler is
//! only reported, never re-dispatched, so resolution cannot recurse.

use std::error::Error;
use std::fmt;
use std::iter;
use std::ptr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::error;

use crate::protocol::{RestRequest, RestResponse};
use crate::server::ServerContext;

/// Root catch-all marker: matches every fault (the "any throwable" tier).
pub static ANY_FAULT: FaultKind = FaultKind { name: "any-fault", parent: None };

/// Catch-all for ordinary errors (the "any exception" tier). Child of
/// [`ANY_FAULT`].
pub static ANY_ERROR: FaultKind = FaultKind { name: "any-error", parent: Some(&ANY_FAULT) };

/// A node in the fault ancestry table. Declared as a `static` and compared
/// by identity, never by name.
///
/// ```
/// use micro_rest::fault::{ANY_ERROR, FaultKind};
///
/// static STORAGE_ERROR: FaultKind = FaultKind::new("storage-error", &ANY_ERROR);
/// static KEY_MISSING: FaultKind = FaultKind::new("key-missing", &STORAGE_ERROR);
///
/// assert!(KEY_MISSING.descends_from(&STORAGE_ERROR));
/// assert!(KEY_MISSING.descends_from(&ANY_ERROR));
/// assert!(!STORAGE_ERROR.descends_from(&KEY_MISSING));
/// ```
pub struct FaultKind {
    name: &'static str,
    parent: Option<&'static FaultKind>,
}

impl FaultKind {
    pub const fn new(name: &'static str, parent: &'static FaultKind) -> Self {
        Self { name, parent: Some(parent) }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Identity comparison; kinds are statics, so pointer equality is kind
    /// equality.
    pub fn is(&'static self, other: &'static FaultKind) -> bool {
        ptr::eq(self, other)
    }

    pub fn is_generic(&'static self) -> bool {
        self.is(&ANY_ERROR) || self.is(&ANY_FAULT)
    }

    /// Strict ancestors, nearest first. Does not yield `self`.
    pub fn ancestors(&'static self) -> impl Iterator<Item = &'static FaultKind> {
        iter::successors(self.parent, |kind| kind.parent)
    }

    /// Strict ancestry test; a kind does not descend from itself.
    pub fn descends_from(&'static self, other: &'static FaultKind) -> bool {
        self.ancestors().any(|kind| kind.is(other))
    }
}

impl fmt::Debug for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultKind").field("name", &self.name).field("parent", &self.parent.map(|kind| kind.name)).finish()
    }
}

/// The uniform error raised by handlers, tagged with its kind for
/// resolution.
#[derive(Debug, Error)]
#[error("{}: {}", kind.name(), message)]
pub struct HandlerFault {
    kind: &'static FaultKind,
    message: String,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl HandlerFault {
    pub fn new(kind: &'static FaultKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), source: None }
    }

    pub fn with_source(kind: &'static FaultKind, message: impl Into<String>, source: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self { kind, message: message.into(), source: Some(source.into()) }
    }

    pub fn kind(&self) -> &'static FaultKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for HandlerFault {
    fn from(e: serde_json::Error) -> Self {
        Self::with_source(&ANY_ERROR, "json codec failed", e)
    }
}

/// An error-handling operation. Receives the four injectable capabilities:
/// the fault itself, the request, the response and the server context.
#[async_trait]
pub trait FaultHandler: Send + Sync {
    async fn handle(
        &self,
        fault: &HandlerFault,
        request: &mut RestRequest,
        response: &mut RestResponse,
        server: &ServerContext,
    ) -> Result<(), HandlerFault>;
}

/// Ordered fault-handler table, built once before the server starts.
pub struct FaultResolver {
    catchers: Vec<(&'static FaultKind, Arc<dyn FaultHandler>)>,
}

impl FaultResolver {
    pub fn builder() -> FaultResolverBuilder {
        FaultResolverBuilder { catchers: Vec::new() }
    }

    /// A resolver with no registrations; every fault stays unhandled.
    pub fn empty() -> Self {
        Self { catchers: Vec::new() }
    }

    fn registration(&self, kind: &'static FaultKind) -> Option<&Arc<dyn FaultHandler>> {
        self.catchers.iter().find(|(registered, _)| registered.is(kind)).map(|(_, handler)| handler)
    }

    /// Applies the three matching tiers and returns the winning handler.
    pub fn resolve(&self, kind: &'static FaultKind) -> Option<&Arc<dyn FaultHandler>> {
        if let Some(handler) = self.registration(kind) {
            return Some(handler);
        }

        for ancestor in kind.ancestors() {
            if ancestor.is_generic() {
                continue;
            }
            if let Some(handler) = self.registration(ancestor) {
                return Some(handler);
            }
        }

        self.catchers.iter().find(|(registered, _)| registered.is_generic()).map(|(_, handler)| handler)
    }

    /// Resolves and invokes the handler for `fault`. Returns whether a
    /// handler ran to completion; an unhandled fault, or a fault raised by
    /// the handler itself, is reported and yields `false`.
    pub async fn dispatch(
        &self,
        fault: &HandlerFault,
        request: &mut RestRequest,
        response: &mut RestResponse,
        server: &ServerContext,
    ) -> bool {
        let Some(handler) = self.resolve(fault.kind()) else {
            error!(fault = %fault, "no fault handler registered, dropping");
            return false;
        };

        match handler.handle(fault, request, response, server).await {
            Ok(()) => true,
            Err(inner) => {
                // never re-dispatched: that would risk infinite recursion
                error!(fault = %fault, cause = %inner, "fault handler itself failed");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.catchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catchers.is_empty()
    }
}

impl fmt::Debug for FaultResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<&str> = self.catchers.iter().map(|(kind, _)| kind.name()).collect();
        f.debug_struct("FaultResolver").field("catchers", &kinds).finish()
    }
}

/// Collects `(kind, handler)` registrations in order.
pub struct FaultResolverBuilder {
    catchers: Vec<(&'static FaultKind, Arc<dyn FaultHandler>)>,
}

impl FaultResolverBuilder {
    pub fn on<H: FaultHandler + 'static>(mut self, kind: &'static FaultKind, handler: H) -> Self {
        self.catchers.push((kind, Arc::new(handler)));
        self
    }

    pub fn build(self) -> FaultResolver {
        FaultResolver { catchers: self.catchers }
    }
}

impl fmt::Debug for FaultResolverBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultResolverBuilder").field("catchers", &self.catchers.len()).finish()
    }
}
