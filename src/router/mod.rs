//! Endpoint registration and resolution.
//!
//! The registry is an ordered list of compiled routes tried in registration
//! order, so when several patterns could match one request the first
//! registered route wins. Registration happens once, before the accept loop
//! starts; afterwards the router is shared read-only across all connection
//! tasks.

mod pattern;

pub use pattern::{PathTemplate, RouteError};

use std::fmt;
use std::sync::Arc;

use http::Method;

use crate::handler::Handler;

/// A registered route: method, compiled pattern and the handler it
/// dispatches to. Immutable once built; several endpoints may share one
/// handler.
pub struct Endpoint {
    method: Method,
    path: String,
    template: PathTemplate,
    handler: Arc<dyn Handler>,
}

impl Endpoint {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn template(&self) -> &PathTemplate {
        &self.template
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint").field("method", &self.method).field("path", &self.path).finish_non_exhaustive()
    }
}

/// Outcome of resolving `(method, path)` against the registry.
#[derive(Debug)]
pub enum RouteOutcome {
    Found(Arc<Endpoint>),
    /// The path is registered, but under a different method.
    MethodNotAllowed,
    NotFound,
}

/// The endpoint registry. Built once via [`Router::builder`], then read-only.
pub struct Router {
    routes: Vec<Arc<Endpoint>>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder { declarations: Vec::new() }
    }

    /// Resolves a request to an endpoint, trying routes in registration
    /// order. A path that matches some route only under another method
    /// reports [`RouteOutcome::MethodNotAllowed`] instead of not-found.
    pub fn resolve(&self, method: &Method, path: &str) -> RouteOutcome {
        for endpoint in &self.routes {
            if endpoint.template.matches(method, path) {
                return RouteOutcome::Found(Arc::clone(endpoint));
            }
        }

        for endpoint in &self.routes {
            if endpoint.method != *method && endpoint.template.matches(&endpoint.method, path) {
                return RouteOutcome::MethodNotAllowed;
            }
        }

        RouteOutcome::NotFound
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router").field("routes", &self.routes).finish()
    }
}

macro_rules! method_route {
    ($name:ident, $method:ident) => {
        pub fn $name<H: Handler + 'static>(self, path: &str, handler: H) -> Self {
            self.route(&[Method::$method], &[path], handler)
        }
    };
}

/// Collects route declarations; patterns are compiled in [`build`].
///
/// [`build`]: RouterBuilder::build
pub struct RouterBuilder {
    declarations: Vec<(Method, String, Arc<dyn Handler>)>,
}

impl RouterBuilder {
    /// Registers one handler under the union of the given methods and
    /// paths. The handler is shared, not cloned, across all of them.
    pub fn route<H: Handler + 'static>(mut self, methods: &[Method], paths: &[&str], handler: H) -> Self {
        let handler: Arc<dyn Handler> = Arc::new(handler);
        for method in methods {
            for path in paths {
                self.declarations.push((method.clone(), path.to_string(), Arc::clone(&handler)));
            }
        }
        self
    }

    method_route!(get, GET);
    method_route!(post, POST);
    method_route!(put, PUT);
    method_route!(delete, DELETE);
    method_route!(patch, PATCH);
    method_route!(head, HEAD);
    method_route!(options, OPTIONS);

    pub fn build(self) -> Result<Router, RouteError> {
        let mut routes = Vec::with_capacity(self.declarations.len());
        for (method, path, handler) in self.declarations {
            let template = PathTemplate::compile(&method, &path)?;
            routes.push(Arc::new(Endpoint { method, path, template, handler }));
        }
        Ok(Router { routes })
    }
}

impl fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterBuilder").field("declarations", &self.declarations.len()).finish()
    }
}
