//! Name-keyed handler registry.

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::ToolHandler;

/// Outcome of looking up a tool name.
#[derive(Clone)]
pub enum Resolution {
    Found(Arc<dyn ToolHandler>),
    NotFound,
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Found(handler) => f.debug_tuple("Found").field(&handler.name()).finish(),
            Self::NotFound => f.write_str("NotFound"),
        }
    }
}

/// Registry mapping tool names to handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own name, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) -> Option<Arc<dyn ToolHandler>> {
        let name = handler.name().to_string();
        let previous = self.handlers.insert(name.clone(), handler);
        if previous.is_some() {
            tracing::debug!(tool = %name, "replaced registered handler");
        }
        previous
    }

    /// Builder-style registration.
    pub fn with(mut self, handler: impl ToolHandler + 'static) -> Self {
        self.register(Arc::new(handler));
        self
    }

    pub fn resolve(&self, name: &str) -> Resolution {
        match self.handlers.get(name) {
            Some(handler) => Resolution::Found(Arc::clone(handler)),
            None => Resolution::NotFound,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}
