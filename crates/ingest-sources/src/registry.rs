use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::FetchError;
use crate::file::FileSource;
use crate::mock::MockSource;
use crate::source::DataSource;

/// Name → source lookup used by the executor.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: HashMap<String, Arc<dyn DataSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `mock` and `file` sources.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MockSource));
        registry.register(Arc::new(FileSource));
        registry
    }

    /// Add a source, replacing any previous one with the same name.
    pub fn register(&mut self, source: Arc<dyn DataSource>) {
        debug!(source = source.name(), "data source registered");
        self.sources.insert(source.name().to_string(), source);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DataSource>, FetchError> {
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| FetchError::UnknownSource {
                name: name.to_string(),
            })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("sources", &self.names())
            .finish()
    }
}
