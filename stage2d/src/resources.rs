//! Asset lookup used to size image and text actors.
//!
//! Decoding and caching policy belong to the provider; the core only asks for
//! dimensions by name.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What a provider knows about a named asset.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Resource {
    /// Pixel dimensions of an image.
    Image { width: u32, height: u32 },
    /// Average glyph advance relative to the line height.
    Font { advance: f32 },
}

/// Glyph advance used for text actors when no font resource is known.
pub const DEFAULT_FONT_ADVANCE: f32 = 0.6;

pub trait ResourceProvider {
    fn get(&self, name: &str) -> Option<Resource>;
}

/// In-memory provider. Entries are registered up front by whoever decodes the assets.
#[derive(Debug, Default)]
pub struct ResourceCache {
    entries: HashMap<String, Resource>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, resource: Resource) {
        self.entries.insert(name.into(), resource);
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, resource: Resource) -> Self {
        self.insert(name, resource);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Resource> {
        self.entries.remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResourceProvider for ResourceCache {
    fn get(&self, name: &str) -> Option<Resource> {
        self.entries.get(name).copied()
    }
}
