use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Global configuration
    #[serde(default)]
    pub global: GlobalConfig,

    /// Registry endpoints
    #[serde(default)]
    pub registries: RegistryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GlobalConfig {
    /// SQLite catalog location
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,

    /// Enable caching of registry responses
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,

    /// Cache TTL in seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl: u64,

    /// Directory patterns skipped while scanning
    #[serde(default)]
    pub exclude_paths: Vec<String>,

    /// Interpreter used for pip
    #[serde(default = "default_python")]
    pub python: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegistryConfig {
    #[serde(default = "default_npm_registry")]
    pub npm: String,

    #[serde(default = "default_pypi_registry")]
    pub pypi: String,

    /// Base URL of the vcpkg ports tree
    #[serde(default = "default_vcpkg_registry")]
    pub vcpkg: String,
}

fn default_catalog_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("depcat")
        .join("catalog.db")
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    1800 // 30 minutes
}

pub fn default_python() -> String {
    if cfg!(windows) { "python" } else { "python3" }.to_string()
}

fn default_npm_registry() -> String {
    "https://registry.npmjs.org".to_string()
}

fn default_pypi_registry() -> String {
    "https://pypi.org/pypi".to_string()
}

fn default_vcpkg_registry() -> String {
    "https://raw.githubusercontent.com/microsoft/vcpkg/master/ports".to_string()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
            cache_enabled: default_cache_enabled(),
            cache_ttl: default_cache_ttl(),
            exclude_paths: Vec::new(),
            python: default_python(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            npm: default_npm_registry(),
            pypi: default_pypi_registry(),
            vcpkg: default_vcpkg_registry(),
        }
    }
}

impl Config {
    /// Load config from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Config file locations, most specific first
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".depcat.toml"), PathBuf::from("depcat.toml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("depcat").join("config.toml"));
        }
        paths
    }

    /// Load the first config found, else defaults. A file that exists but
    /// does not parse is an error rather than silently ignored.
    pub fn load_default() -> Result<Self> {
        for path in Self::search_paths() {
            if path.is_file() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    /// Save config to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = r#"# depcat configuration file

[global]
# SQLite catalog location (defaults to <data dir>/depcat/catalog.db)
# catalog-path = "/home/me/.local/share/depcat/catalog.db"

# Enable caching of registry responses
cache-enabled = true

# Cache TTL in seconds (1800 = 30 minutes)
cache-ttl = 1800

# Directory names or glob patterns skipped while scanning
# exclude-paths = ["vendor", "third_party", "build-*"]

# Interpreter used for pip commands
python = "python3"

[registries]
npm = "https://registry.npmjs.org"
pypi = "https://pypi.org/pypi"
vcpkg = "https://raw.githubusercontent.com/microsoft/vcpkg/master/ports"
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_parse_example_config() {
        let config: Config = toml::from_str(EXAMPLE_CONFIG).unwrap();

        assert!(config.global.cache_enabled);
        assert_eq!(config.global.cache_ttl, 1800);
        assert_eq!(config.global.python, "python3");
        assert!(config.global.exclude_paths.is_empty());
        assert_eq!(config.registries.pypi, "https://pypi.org/pypi");
    }

    #[test]
    fn test_missing_sections_take_defaults() {
        let config: Config = toml::from_str("[global]\nexclude-paths = [\"vendor\"]\n").unwrap();

        assert_eq!(config.global.exclude_paths, vec!["vendor".to_string()]);
        assert_eq!(config.global.cache_ttl, 1800);
        assert!(config.global.catalog_path.ends_with("depcat/catalog.db"));
        assert_eq!(config.registries.npm, "https://registry.npmjs.org");
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("depcat.toml");

        let mut config = Config::default();
        config.global.cache_enabled = false;
        config.global.catalog_path = temp.path().join("catalog.db");
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert!(!loaded.global.cache_enabled);
        assert_eq!(loaded.global.catalog_path, temp.path().join("catalog.db"));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("depcat.toml");
        std::fs::write(&path, "[global\n").unwrap();

        assert!(Config::load(&path).is_err());
    }
}
