//! In-memory file tree with one active file.
//!
//! Content is only ever changed through [`Workspace::update`], which reads the
//! current snapshot and writes the result in one step, so a caller holding an
//! older copy of the text can't overwrite a newer one.

use crate::error::WorkspaceError;
use std::collections::BTreeMap;

/// Before and after text of one mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChange {
    pub file_name: String,
    pub before: String,
    pub after: String,
}

impl ContentChange {
    pub fn is_noop(&self) -> bool {
        self.before == self.after
    }
}

#[derive(Debug, Clone, Default)]
pub struct Workspace {
    files: BTreeMap<String, String>,
    active: Option<String>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a workspace from `(name, content)` pairs. Nothing is active.
    pub fn with_files<I, N, C>(files: I) -> Result<Self, WorkspaceError>
    where
        I: IntoIterator<Item = (N, C)>,
        N: Into<String>,
        C: Into<String>,
    {
        let mut workspace = Self::new();
        for (name, content) in files {
            workspace.create(name, content)?;
        }
        Ok(workspace)
    }

    pub fn create(
        &mut self,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<(), WorkspaceError> {
        let name = validate_name(name.into())?;
        if self.files.contains_key(&name) {
            return Err(WorkspaceError::AlreadyExists(name));
        }
        self.files.insert(name, content.into());
        Ok(())
    }

    /// Make a file active and return its content.
    pub fn open(&mut self, name: &str) -> Result<&str, WorkspaceError> {
        let (key, content) = self
            .files
            .get_key_value(name)
            .ok_or_else(|| WorkspaceError::NotFound(name.to_string()))?;
        self.active = Some(key.clone());
        Ok(content)
    }

    /// Remove a file, returning its last content. Clears the active file if it
    /// was the one removed.
    pub fn delete(&mut self, name: &str) -> Result<String, WorkspaceError> {
        let content = self
            .files
            .remove(name)
            .ok_or_else(|| WorkspaceError::NotFound(name.to_string()))?;
        if self.active.as_deref() == Some(name) {
            self.active = None;
        }
        Ok(content)
    }

    pub fn rename(&mut self, from: &str, to: impl Into<String>) -> Result<(), WorkspaceError> {
        let to = validate_name(to.into())?;
        if !self.files.contains_key(from) {
            return Err(WorkspaceError::NotFound(from.to_string()));
        }
        if from == to {
            return Ok(());
        }
        if self.files.contains_key(&to) {
            return Err(WorkspaceError::AlreadyExists(to));
        }
        if let Some(content) = self.files.remove(from) {
            self.files.insert(to.clone(), content);
        }
        if self.active.as_deref() == Some(from) {
            self.active = Some(to);
        }
        Ok(())
    }

    /// Read-modify-write a file's content.
    pub fn update<F>(&mut self, name: &str, f: F) -> Result<ContentChange, WorkspaceError>
    where
        F: FnOnce(&str) -> String,
    {
        let content = self
            .files
            .get_mut(name)
            .ok_or_else(|| WorkspaceError::NotFound(name.to_string()))?;
        let after = f(content);
        let before = std::mem::replace(content, after.clone());
        Ok(ContentChange {
            file_name: name.to_string(),
            before,
            after,
        })
    }

    /// Replace a file's content wholesale.
    pub fn replace(
        &mut self,
        name: &str,
        content: impl Into<String>,
    ) -> Result<ContentChange, WorkspaceError> {
        let content = content.into();
        self.update(name, move |_| content)
    }

    pub fn content(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    /// File names in sorted order.
    pub fn list(&self) -> Vec<&str> {
        self.files.keys().map(String::as_str).collect()
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active_content(&self) -> Option<&str> {
        self.active.as_deref().and_then(|name| self.content(name))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn validate_name(name: String) -> Result<String, WorkspaceError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.ends_with('/') || trimmed.contains('\0') {
        return Err(WorkspaceError::InvalidName(name));
    }
    Ok(trimmed.to_string())
}
