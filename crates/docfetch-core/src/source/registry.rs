//! Maps source ids to adapters.

use std::collections::HashMap;
use std::sync::Arc;

use super::{HttpSource, SourceAdapter};
use crate::config::DocfetchConfig;

#[derive(Clone)]
pub struct SourceRegistry {
    default: Arc<dyn SourceAdapter>,
    sources: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new(Arc::new(HttpSource::new()))
    }
}

impl SourceRegistry {
    /// Registry where unknown sources use `default`.
    pub fn new(default: Arc<dyn SourceAdapter>) -> Self {
        Self {
            default,
            sources: HashMap::new(),
        }
    }

    /// One `HttpSource` per `[sources.*]` entry.
    pub fn from_config(cfg: &DocfetchConfig) -> Self {
        let mut registry = Self::default();
        for (id, source_cfg) in &cfg.sources {
            registry.register(id, Arc::new(HttpSource::from_config(source_cfg)));
        }
        registry
    }

    pub fn register(&mut self, source_id: impl Into<String>, adapter: Arc<dyn SourceAdapter>) {
        self.sources.insert(source_id.into(), adapter);
    }

    pub fn get(&self, source_id: &str) -> Arc<dyn SourceAdapter> {
        self.sources
            .get(source_id)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.default))
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.sources.keys().collect();
        ids.sort();
        f.debug_struct("SourceRegistry").field("sources", &ids).finish()
    }
}
