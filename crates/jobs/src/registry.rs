//! Operation handler registry.
//!
//! Built once with [`HandlerRegistry::register`], then shared read-only. A
//! process may additionally install one registry globally; installation
//! happens exactly once and the registry never changes afterwards.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use forgebatch_core::{BatchError, BatchResult};

use crate::handler::{HandlerCall, OperationHandler, SliceOutcome};

static GLOBAL: OnceLock<HandlerRegistry> = OnceLock::new();

/// Operation ids end up in derived queue ids (`<job>:<index>:<operation>`), so
/// they must be non-empty and free of whitespace and `:`.
pub fn is_valid_operation_id(id: &str) -> bool {
    !id.is_empty() && !id.chars().any(|c| c.is_whitespace() || c == ':')
}

/// Maps operation ids to their handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn OperationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an operation id. Ids are registered once.
    pub fn register<H>(&mut self, operation: impl Into<String>, handler: H) -> BatchResult<()>
    where
        H: OperationHandler + 'static,
    {
        let operation = operation.into();
        if !is_valid_operation_id(&operation) {
            return Err(BatchError::validation(format!(
                "operation id '{operation}' must be non-empty and contain no whitespace or ':'"
            )));
        }
        if self.handlers.contains_key(&operation) {
            return Err(BatchError::conflict(format!(
                "handler already registered for operation '{operation}'"
            )));
        }
        self.handlers.insert(operation, Arc::new(handler));
        Ok(())
    }

    /// Register a closure handler.
    pub fn register_fn<F>(&mut self, operation: impl Into<String>, handler: F) -> BatchResult<()>
    where
        F: Fn(&HandlerCall<'_>) -> SliceOutcome + Send + Sync + 'static,
    {
        self.register(operation, handler)
    }

    pub fn get(&self, operation: &str) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.get(operation).cloned()
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.handlers.contains_key(operation)
    }

    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Install this registry as the process-wide registry.
    ///
    /// Fails if one was already installed.
    pub fn install_global(self) -> BatchResult<&'static HandlerRegistry> {
        let mut installed = false;
        let registry = GLOBAL.get_or_init(|| {
            installed = true;
            self
        });
        if installed {
            tracing::info!(handlers = registry.len(), "installed global handler registry");
            Ok(registry)
        } else {
            Err(BatchError::conflict("global handler registry already installed"))
        }
    }

    /// The process-wide registry, if installed.
    pub fn global() -> Option<&'static HandlerRegistry> {
        GLOBAL.get()
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("operations", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
