//! Route pattern compilation.
//!
//! A declared path such as `/user/{id}` compiles into an anchored regex over
//! the subject string `"<METHOD>:<path>"`, e.g. `^GET:/user/([^/]*)$`.
//! Folding the method into the subject means a path registered for GET never
//! matches a POST request. Placeholder names are collected in declaration
//! order and bound positionally to capture groups.

use std::collections::HashMap;

use http::Method;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("route '{path}' has an invalid placeholder: {reason}")]
    InvalidPlaceholder { path: String, reason: String },

    #[error("route '{path}' declares parameter '{name}' more than once")]
    DuplicateParam { path: String, name: String },

    #[error("route '{path}' failed to compile: {source}")]
    Compile { path: String, source: regex::Error },
}

impl RouteError {
    fn invalid_placeholder<S: ToString>(path: &str, reason: S) -> Self {
        Self::InvalidPlaceholder { path: path.to_string(), reason: reason.to_string() }
    }
}

/// A compiled route pattern: the anchored matcher plus the ordered
/// placeholder names aligned with its capture groups.
#[derive(Debug)]
pub struct PathTemplate {
    regex: Regex,
    param_names: Vec<String>,
}

impl PathTemplate {
    /// Compiles `path` for `method`. Placeholders are `{identifier}` where
    /// the identifier is `[A-Za-z0-9_]+`; everything else is matched
    /// literally. The result anchors at both ends, so a route with no
    /// placeholders matches only the exact path.
    pub fn compile(method: &Method, path: &str) -> Result<Self, RouteError> {
        let mut pattern = String::with_capacity(path.len() + 16);
        pattern.push('^');
        pattern.push_str(&regex::escape(method.as_str()));
        pattern.push(':');

        let mut param_names: Vec<String> = Vec::new();
        let mut rest = path;

        while let Some(open) = rest.find('{') {
            pattern.push_str(&regex::escape(&rest[..open]));

            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| RouteError::invalid_placeholder(path, "unclosed '{'"))?;

            let name = &after[..close];
            if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
                return Err(RouteError::invalid_placeholder(path, format!("'{name}' is not a valid identifier")));
            }
            if param_names.iter().any(|existing| existing == name) {
                return Err(RouteError::DuplicateParam { path: path.to_string(), name: name.to_string() });
            }

            param_names.push(name.to_string());
            pattern.push_str("([^/]*)");
            rest = &after[close + 1..];
        }

        pattern.push_str(&regex::escape(rest));
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|source| RouteError::Compile { path: path.to_string(), source })?;

        Ok(Self { regex, param_names })
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.regex.is_match(&subject(method, path))
    }

    /// Binds capture groups to placeholder names. Returns `None` when the
    /// subject does not match.
    pub fn capture(&self, method: &Method, path: &str) -> Option<HashMap<String, String>> {
        let subject = subject(method, path);
        let captures = self.regex.captures(&subject)?;

        let mut params = HashMap::with_capacity(self.param_names.len());
        for (index, name) in self.param_names.iter().enumerate() {
            if let Some(matched) = captures.get(index + 1) {
                params.insert(name.clone(), matched.as_str().to_string());
            }
        }
        Some(params)
    }

    /// Placeholder names in declaration order.
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }
}

fn subject(method: &Method, path: &str) -> String {
    format!("{method}:{path}")
}
