//! Error marshaling across the wire.
//!
//! A [`RemoteError`] is the local form of an error that crossed (or will cross)
//! a connection. [`marshal`] flattens it into a [`WireError`];
//! [`ErrorRegistry::unmarshal`] rebuilds it, resolving the transmitted name
//! against a closed registry of known kinds. Unknown names are an expected case
//! and fall back to [`ErrorKind::Generic`] while keeping the transmitted name.

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tether_protocol::WireError;
use thiserror::Error;
use tracing::{debug, trace};

/// Field names every error kind rejects as custom fields.
pub const RESERVED_FIELDS: [&str; 3] = ["name", "message", "stack"];

/// Kind of a reconstructed error.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Fallback for names without a registered kind.
    Generic,
    /// `TypeError`.
    Type,
    /// `RangeError`.
    Range,
    /// `SyntaxError`.
    Syntax,
    /// `ReferenceError`.
    Reference,
    /// `EvalError`.
    Eval,
    /// `URIError`.
    Uri,
    /// An application-registered kind.
    Custom(Arc<str>),
}

impl ErrorKind {
    /// Canonical wire name of this kind.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            ErrorKind::Generic => "Error",
            ErrorKind::Type => "TypeError",
            ErrorKind::Range => "RangeError",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Reference => "ReferenceError",
            ErrorKind::Eval => "EvalError",
            ErrorKind::Uri => "URIError",
            ErrorKind::Custom(name) => name,
        }
    }

    const BUILTIN: [ErrorKind; 7] = [
        ErrorKind::Generic,
        ErrorKind::Type,
        ErrorKind::Range,
        ErrorKind::Syntax,
        ErrorKind::Reference,
        ErrorKind::Eval,
        ErrorKind::Uri,
    ];
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An error value that can travel over a connection.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{name}: {message}")]
pub struct RemoteError {
    kind: ErrorKind,
    name: String,
    message: String,
    stack: String,
    custom: Map<String, Value>,
}

impl RemoteError {
    /// Create a new error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let name = kind.name().to_string();
        let message = message.into();
        Self {
            stack: format!("{name}: {message}"),
            kind,
            name,
            message,
            custom: Map::new(),
        }
    }

    /// Create a new error of the generic kind.
    #[must_use]
    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Generic, message)
    }

    /// Capture any Rust error.
    ///
    /// The name is the error's type name without its module path, the message
    /// its `Display` output and the stack the chain of `source()` errors.
    #[must_use]
    pub fn capture<E: std::error::Error + ?Sized>(error: &E) -> Self {
        let full = std::any::type_name::<E>();
        let path = full.split('<').next().unwrap_or(full);
        let name = path.rsplit("::").next().unwrap_or(path);

        let mut stack = format!("{name}: {error}");
        let mut source = error.source();
        while let Some(cause) = source {
            stack.push_str(&format!("\n    caused by: {cause}"));
            source = cause.source();
        }

        Self::generic(error.to_string())
            .with_name(name)
            .with_stack(stack)
    }

    /// Override the transmitted name. The kind is unchanged.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the trace text.
    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }

    /// Attach a custom field.
    ///
    /// Values that fail to serialize are dropped, as are the reserved names
    /// `name`, `message` and `stack`.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(value) => self.set_field(key, value),
            Err(e) => debug!(field = %key, error = %e, "Dropping unserializable error field"),
        }
        self
    }

    fn set_field(&mut self, key: String, value: Value) {
        if RESERVED_FIELDS.contains(&key.as_str()) {
            trace!(field = %key, "Skipping reserved error field");
            return;
        }
        self.custom.insert(key, value);
    }

    /// Get the error kind.
    #[must_use]
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Get the transmitted name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the trace text.
    #[must_use]
    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Get all custom fields.
    #[must_use]
    pub fn custom(&self) -> &Map<String, Value> {
        &self.custom
    }

    /// Get one custom field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.custom.get(key)
    }
}

/// Flatten an error into its wire form.
#[must_use]
pub fn marshal(error: &RemoteError) -> WireError {
    WireError {
        name: error.name.clone(),
        message: error.message.clone(),
        stack: error.stack.clone(),
        custom: error.custom.clone(),
    }
}

impl From<&RemoteError> for WireError {
    fn from(error: &RemoteError) -> Self {
        marshal(error)
    }
}

static GLOBAL_REGISTRY: OnceLock<Arc<ErrorRegistry>> = OnceLock::new();

/// Registry of known error kinds, keyed by wire name.
#[derive(Debug)]
pub struct ErrorRegistry {
    kinds: DashMap<String, ErrorKind>,
}

impl ErrorRegistry {
    /// Create a registry that knows the builtin kinds.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self::empty();
        for kind in ErrorKind::BUILTIN {
            registry.register_kind(kind.name().to_string(), kind);
        }
        registry
    }

    /// Create a registry with no known kinds.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            kinds: DashMap::new(),
        }
    }

    /// The process-wide registry.
    pub fn global() -> Arc<ErrorRegistry> {
        GLOBAL_REGISTRY
            .get_or_init(|| Arc::new(ErrorRegistry::new()))
            .clone()
    }

    /// Register an application kind under `name`.
    pub fn register(&self, name: impl Into<String>) -> ErrorKind {
        let name = name.into();
        let kind = ErrorKind::Custom(Arc::from(name.as_str()));
        self.register_kind(name, kind.clone());
        kind
    }

    /// Map `name` to an existing kind.
    pub fn register_kind(&self, name: impl Into<String>, kind: ErrorKind) {
        let name = name.into();
        debug!(name = %name, kind = %kind, "Registering error kind");
        self.kinds.insert(name, kind);
    }

    /// Look up the kind registered for `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<ErrorKind> {
        self.kinds.get(name).map(|kind| kind.value().clone())
    }

    /// Check if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    /// Rebuild an error from its wire form.
    #[must_use]
    pub fn unmarshal(&self, wire: WireError) -> RemoteError {
        let kind = self.lookup(&wire.name).unwrap_or_else(|| {
            trace!(name = %wire.name, "Unknown error kind, using generic");
            ErrorKind::Generic
        });

        let mut error = RemoteError::new(kind, wire.message)
            .with_name(wire.name)
            .with_stack(wire.stack);

        for (key, value) in wire.custom {
            error.set_field(key, value);
        }

        error
    }
}

impl Default for ErrorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
