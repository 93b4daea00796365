//! MUSH Engine Configuration
//!
//! Loads engine limits from a `key = value` options file and keeps a
//! hot-reloadable snapshot that evaluations read at start-up.

use mush_core::{MushError, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default location of the options file
pub const DEFAULT_CONFIG_PATH: &str = "config/mush.txt";

/// Evaluation ceilings
///
/// Every top-level evaluation copies these at start; exceeding any of them
/// aborts the whole evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitOptions {
    /// Maximum nesting of function calls (from "max_depth" option, default: 100)
    pub max_depth: usize,
    /// Maximum occurrences of one function name in the active call chain
    /// (from "function_recursion_limit" option, default: 50)
    pub function_recursion_limit: usize,
    /// Maximum function calls per evaluation
    /// (from "function_invocation_limit" option, default: 25000)
    pub function_invocation_limit: usize,
    /// Maximum parse-tree nodes evaluated per evaluation
    /// (from "call_limit" option, default: 250000)
    pub call_limit: usize,
}

impl Default for LimitOptions {
    fn default() -> Self {
        Self {
            max_depth: 100,
            function_recursion_limit: 50,
            function_invocation_limit: 25_000,
            call_limit: 250_000,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub limits: LimitOptions,
    /// Parent-chain hop limit for attribute and lock inheritance
    /// (from "max_parent_depth" option, default: 10)
    pub max_parent_depth: usize,
    /// Compiled pattern cache size (from "pattern_cache_capacity" option, default: 512)
    pub pattern_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: LimitOptions::default(),
            max_parent_depth: 10,
            pattern_cache_capacity: 512,
        }
    }
}

impl EngineConfig {
    /// Load configuration from an options file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Load from [`DEFAULT_CONFIG_PATH`]
    pub fn load_default() -> Result<Self> {
        Self::load_from_file(DEFAULT_CONFIG_PATH)
    }

    /// Parse options file content
    pub fn parse(content: &str) -> Self {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                config.parse_option(&key.trim().to_ascii_lowercase(), value.trim());
            }
        }

        config
    }

    fn parse_option(&mut self, key: &str, value: &str) {
        let defaults = Self::default();
        match key {
            "max_depth" => {
                self.limits.max_depth = value.parse().unwrap_or(defaults.limits.max_depth);
            }
            "function_recursion_limit" => {
                self.limits.function_recursion_limit = value
                    .parse()
                    .unwrap_or(defaults.limits.function_recursion_limit);
            }
            "function_invocation_limit" => {
                self.limits.function_invocation_limit = value
                    .parse()
                    .unwrap_or(defaults.limits.function_invocation_limit);
            }
            "call_limit" => {
                self.limits.call_limit = value.parse().unwrap_or(defaults.limits.call_limit);
            }
            "max_parent_depth" => {
                self.max_parent_depth = value.parse().unwrap_or(defaults.max_parent_depth);
            }
            "pattern_cache_capacity" => {
                self.pattern_cache_capacity =
                    value.parse().unwrap_or(defaults.pattern_cache_capacity);
            }
            _ => {
                tracing::debug!("Unknown config option: {} = {}", key, value);
            }
        }
    }

    /// Log the active configuration
    pub fn display(&self) {
        tracing::info!("Engine configuration:");
        tracing::info!("    Max depth: {}", self.limits.max_depth);
        tracing::info!("    Function recursion limit: {}", self.limits.function_recursion_limit);
        tracing::info!("    Function invocation limit: {}", self.limits.function_invocation_limit);
        tracing::info!("    Call limit: {}", self.limits.call_limit);
        tracing::info!("    Max parent depth: {}", self.max_parent_depth);
        tracing::info!("    Pattern cache capacity: {}", self.pattern_cache_capacity);
    }
}

/// Shared, hot-reloadable configuration
///
/// Readers take an `Arc` snapshot; a reload swaps the whole snapshot so an
/// in-flight evaluation keeps the values it started with.
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<EngineConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub fn snapshot(&self) -> Arc<EngineConfig> {
        Arc::clone(&self.current.read())
    }

    pub fn replace(&self, config: EngineConfig) {
        *self.current.write() = Arc::new(config);
    }

    /// Re-read an options file and swap it in
    pub fn reload_from<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let config = EngineConfig::load_from_file(path.as_ref())?;
        tracing::info!("Reloaded configuration from {}", path.as_ref().display());
        self.replace(config);
        Ok(())
    }

    /// Watch an options file and reload it whenever it changes.
    ///
    /// The returned watcher must be kept alive for reloads to continue.
    pub fn watch<P: AsRef<Path>>(&self, path: P) -> Result<RecommendedWatcher> {
        let handle = self.clone();
        let file: PathBuf = path.as_ref().to_path_buf();
        let target = file.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    if let Err(e) = handle.reload_from(&target) {
                        tracing::warn!("Failed to reload {}: {}", target.display(), e);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Config watch error: {}", e),
            }
        })
        .map_err(|e| MushError::Config(e.to_string()))?;
        watcher
            .watch(&file, RecursiveMode::NonRecursive)
            .map_err(|e| MushError::Config(e.to_string()))?;
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_options() {
        let config = EngineConfig::parse(
            "# limits\nmax_depth = 10\nfunction_recursion_limit=5\n\ncall_limit = 99\nbogus = 1\n",
        );
        assert_eq!(config.limits.max_depth, 10);
        assert_eq!(config.limits.function_recursion_limit, 5);
        assert_eq!(config.limits.call_limit, 99);
        assert_eq!(
            config.limits.function_invocation_limit,
            LimitOptions::default().function_invocation_limit
        );
    }

    #[test]
    fn test_bad_values_fall_back_to_defaults() {
        let config = EngineConfig::parse("max_depth = lots\nmax_parent_depth = -3");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_snapshot_survives_reload() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_depth = 7").unwrap();

        let handle = ConfigHandle::default();
        let before = handle.snapshot();
        handle.reload_from(file.path()).unwrap();

        assert_eq!(before.limits.max_depth, 100);
        assert_eq!(handle.snapshot().limits.max_depth, 7);
    }

    #[test]
    fn test_reload_missing_file_keeps_current() {
        let handle = ConfigHandle::new(EngineConfig::parse("max_depth = 3"));
        assert!(handle.reload_from("/nonexistent/mush.txt").is_err());
        assert_eq!(handle.snapshot().limits.max_depth, 3);
    }
}
