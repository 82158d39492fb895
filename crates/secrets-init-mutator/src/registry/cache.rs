//! Process-wide image config cache

use dashmap::DashMap;

use super::ImageEntrypointConfig;

/// Storage for resolved image configs, keyed by exact image reference
pub trait ImageCache: Send + Sync {
    /// Cached config for `image`, if any
    fn get(&self, image: &str) -> Option<ImageEntrypointConfig>;

    /// Store the config for `image`, replacing an earlier entry
    fn put(&self, image: &str, config: ImageEntrypointConfig);
}

/// Unbounded in-memory cache shared by concurrent admission requests.
///
/// Entries live for the whole process. Racing writers for the same image
/// store identical values, so the last write simply wins.
#[derive(Debug, Default)]
pub struct InMemoryImageCache {
    entries: DashMap<String, ImageEntrypointConfig>,
}

impl InMemoryImageCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl InMemoryImageCache {
    /// Number of cached images
    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no image has been cached yet
    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ImageCache for InMemoryImageCache {
    fn get(&self, image: &str) -> Option<ImageEntrypointConfig> {
        self.entries.get(image).map(|entry| entry.value().clone())
    }

    fn put(&self, image: &str, config: ImageEntrypointConfig) {
        self.entries.insert(image.to_string(), config);
    }
}
