//! Feature-extraction plugin boundary.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use ad3_core::Plugin;

/// A pure function from an audio file to a feature vector.
///
/// Called on the worker pool, so implementations may block.
pub trait VectorPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Reference recorded in the catalogue's `Plugin` row.
    fn module_ref(&self) -> &str {
        self.name()
    }

    fn compute_vector(&self, path: &Path) -> anyhow::Result<Vec<f64>>;
}

/// Plugins available on this node, by name.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn VectorPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding only the built-in plugins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ByteHistogramPlugin::default()));
        registry
    }

    pub fn register(&mut self, plugin: Arc<dyn VectorPlugin>) {
        self.plugins.insert(plugin.name().to_string(), plugin);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn VectorPlugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    /// Catalogue rows describing every registered plugin.
    pub fn entities(&self) -> Vec<Plugin> {
        self.plugins
            .values()
            .map(|p| Plugin::new(p.name(), p.module_ref()))
            .collect()
    }
}

/// Normalized histogram of the file's bytes, `bins` buckets wide.
pub struct ByteHistogramPlugin {
    bins: usize,
}

impl Default for ByteHistogramPlugin {
    fn default() -> Self {
        Self { bins: 16 }
    }
}

impl ByteHistogramPlugin {
    pub const NAME: &'static str = "byte_histogram";
}

impl VectorPlugin for ByteHistogramPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn module_ref(&self) -> &str {
        "builtin:byte_histogram"
    }

    fn compute_vector(&self, path: &Path) -> anyhow::Result<Vec<f64>> {
        let mut file = File::open(path)?;
        let mut counts = vec![0u64; self.bins];
        let mut buf = [0u8; 8192];
        let mut total = 0u64;
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            for &byte in &buf[..n] {
                counts[byte as usize * self.bins / 256] += 1;
            }
            total += n as u64;
        }
        anyhow::ensure!(total > 0, "{} is empty", path.display());
        Ok(counts
            .into_iter()
            .map(|c| c as f64 / total as f64)
            .collect())
    }
}
