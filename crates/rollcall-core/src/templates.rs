//! Per-student face templates.
//!
//! A template is an opaque encoded image (base64 PNG in practice). Every
//! student shares one namespace keyed by student id, holding at most one
//! template each; saving again overwrites.

use std::collections::BTreeMap;
use std::sync::Mutex;
use thiserror::Error;

/// Key-value namespace (and schema tag) all templates live under.
pub const TEMPLATE_NAMESPACE: &str = "faces.v1";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("template encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Storage for enrolled face templates.
pub trait TemplateStore: Send + Sync {
    /// Store or replace the template for `student_id`.
    fn save(&self, student_id: &str, template: &str) -> Result<(), StoreError>;
    /// The stored template, or `None` if the student never enrolled.
    fn load(&self, student_id: &str) -> Result<Option<String>, StoreError>;
    /// Remove a template. Returns whether one existed.
    fn remove(&self, student_id: &str) -> Result<bool, StoreError>;
    /// Ids of all enrolled students, sorted.
    fn list(&self) -> Result<Vec<String>, StoreError>;
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryTemplateStore {
    templates: Mutex<BTreeMap<String, String>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, StoreError> {
        self.templates
            .lock()
            .map_err(|_| StoreError::Backend("template map lock poisoned".into()))
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn save(&self, student_id: &str, template: &str) -> Result<(), StoreError> {
        self.lock()?
            .insert(student_id.to_string(), template.to_string());
        Ok(())
    }

    fn load(&self, student_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.get(student_id).cloned())
    }

    fn remove(&self, student_id: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.remove(student_id).is_some())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}
