//! Task handlers and the type registry

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{IngestError, Result};
use crate::funnel::ContentArtifact;
use crate::task::Task;

/// Domain logic for one task type
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn process(&self, task: &Task) -> Result<ContentArtifact>;
}

/// Maps task types to handlers. Built once at startup and handed to the
/// runtime.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) -> &mut Self {
        self.handlers.insert(task_type.into(), handler);
        self
    }

    pub fn with(mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.register(task_type, handler);
        self
    }

    pub fn get(&self, task_type: &str) -> Result<Arc<dyn TaskHandler>> {
        self.handlers
            .get(task_type)
            .cloned()
            .ok_or_else(|| IngestError::UnknownTaskType(task_type.to_string()))
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Registered types, sorted
    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
