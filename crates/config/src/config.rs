//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address the HTTP adapter binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:5000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Filesystem layout: staging area for uploads and output area for artifacts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,
    #[serde(default = "default_conversions_dir")]
    pub conversions_dir: PathBuf,
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_conversions_dir() -> PathBuf {
    PathBuf::from("conversions")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            uploads_dir: default_uploads_dir(),
            conversions_dir: default_conversions_dir(),
        }
    }
}

/// Worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WorkersConfig {
    /// Number of logical cores (auto-detected if None)
    pub logical_cores: Option<u32>,
    /// Maximum concurrent conversions (0 = auto-derive)
    #[serde(default)]
    pub max_concurrent_jobs: u32,
}

/// External tools used for conversion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Transcoding engine binary
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    /// Still-image decoder used as the HEIC/HEIF bridge
    #[serde(default = "default_heif_decoder_path")]
    pub heif_decoder_path: PathBuf,
    /// Per-invocation timeout in seconds (0 = no timeout)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_heif_decoder_path() -> PathBuf {
    PathBuf::from("heif-convert")
}

fn default_timeout_secs() -> u64 {
    3600
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            heif_decoder_path: default_heif_decoder_path(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Task registry retention
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistryConfig {
    /// How long a finished task stays pollable (0 = forever)
    #[serde(default = "default_task_ttl_secs")]
    pub task_ttl_secs: u64,
    /// How often the sweeper looks for expired tasks
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_task_ttl_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            task_ttl_secs: default_task_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Unparseable numeric values are ignored and the existing value is kept.
    /// - CONVERTER_BIND_ADDR -> server.bind_addr
    /// - CONVERTER_UPLOADS_DIR -> paths.uploads_dir
    /// - CONVERTER_CONVERSIONS_DIR -> paths.conversions_dir
    /// - CONVERTER_LOGICAL_CORES -> workers.logical_cores
    /// - CONVERTER_MAX_CONCURRENT_JOBS -> workers.max_concurrent_jobs
    /// - CONVERTER_FFMPEG_PATH -> engine.ffmpeg_path
    /// - CONVERTER_HEIF_DECODER_PATH -> engine.heif_decoder_path
    /// - CONVERTER_TIMEOUT_SECS -> engine.timeout_secs
    /// - CONVERTER_TASK_TTL_SECS -> registry.task_ttl_secs
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("CONVERTER_BIND_ADDR") {
            if !val.trim().is_empty() {
                self.server.bind_addr = val;
            }
        }

        if let Ok(val) = env::var("CONVERTER_UPLOADS_DIR") {
            if !val.trim().is_empty() {
                self.paths.uploads_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("CONVERTER_CONVERSIONS_DIR") {
            if !val.trim().is_empty() {
                self.paths.conversions_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("CONVERTER_LOGICAL_CORES") {
            if let Ok(cores) = val.parse::<u32>() {
                self.workers.logical_cores = Some(cores);
            }
        }

        if let Ok(val) = env::var("CONVERTER_MAX_CONCURRENT_JOBS") {
            if let Ok(jobs) = val.parse::<u32>() {
                self.workers.max_concurrent_jobs = jobs;
            }
        }

        if let Ok(val) = env::var("CONVERTER_FFMPEG_PATH") {
            if !val.trim().is_empty() {
                self.engine.ffmpeg_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("CONVERTER_HEIF_DECODER_PATH") {
            if !val.trim().is_empty() {
                self.engine.heif_decoder_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("CONVERTER_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.engine.timeout_secs = secs;
            }
        }

        if let Ok(val) = env::var("CONVERTER_TASK_TTL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.registry.task_ttl_secs = secs;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from file if it exists, otherwise start from defaults.
    /// Environment overrides are applied either way.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = if path.as_ref().exists() {
            Self::load_from_file(path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Env var tests share process state
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env_vars() {
        for var in [
            "CONVERTER_BIND_ADDR",
            "CONVERTER_UPLOADS_DIR",
            "CONVERTER_CONVERSIONS_DIR",
            "CONVERTER_LOGICAL_CORES",
            "CONVERTER_MAX_CONCURRENT_JOBS",
            "CONVERTER_FFMPEG_PATH",
            "CONVERTER_HEIF_DECODER_PATH",
            "CONVERTER_TIMEOUT_SECS",
            "CONVERTER_TASK_TTL_SECS",
        ] {
            env::remove_var(var);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            logical_cores in proptest::option::of(1u32..256),
            max_jobs in 0u32..16,
            timeout in 0u64..100_000,
            ttl in 0u64..100_000,
            port in 1024u16..65535,
        ) {
            let toml_str = format!(
                r#"
[server]
bind_addr = "0.0.0.0:{}"

[paths]
uploads_dir = "/srv/uploads"
conversions_dir = "/srv/conversions"

[workers]
{}
max_concurrent_jobs = {}

[engine]
ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"
timeout_secs = {}

[registry]
task_ttl_secs = {}
"#,
                port,
                logical_cores.map(|c| format!("logical_cores = {}", c)).unwrap_or_default(),
                max_jobs,
                timeout,
                ttl,
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.server.bind_addr, format!("0.0.0.0:{}", port));
            prop_assert_eq!(config.paths.uploads_dir, PathBuf::from("/srv/uploads"));
            prop_assert_eq!(config.paths.conversions_dir, PathBuf::from("/srv/conversions"));
            prop_assert_eq!(config.workers.logical_cores, logical_cores);
            prop_assert_eq!(config.workers.max_concurrent_jobs, max_jobs);
            prop_assert_eq!(config.engine.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
            prop_assert_eq!(config.engine.heif_decoder_path, PathBuf::from("heif-convert"));
            prop_assert_eq!(config.engine.timeout_secs, timeout);
            prop_assert_eq!(config.registry.task_ttl_secs, ttl);
        }

        #[test]
        fn prop_env_overrides_max_concurrent_jobs(
            initial_jobs in 0u32..8,
            override_jobs in 0u32..16,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[workers]\nmax_concurrent_jobs = {}\n", initial_jobs);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("CONVERTER_MAX_CONCURRENT_JOBS", override_jobs.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.workers.max_concurrent_jobs, override_jobs);
        }

        #[test]
        fn prop_env_overrides_timeout(
            initial in 0u64..10_000,
            override_secs in 0u64..10_000,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[engine]\ntimeout_secs = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("CONVERTER_TIMEOUT_SECS", override_secs.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.engine.timeout_secs, override_secs);
        }
    }

    #[test]
    fn test_env_overrides_paths_and_tools() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("CONVERTER_UPLOADS_DIR", "/data/in");
        env::set_var("CONVERTER_CONVERSIONS_DIR", "/data/out");
        env::set_var("CONVERTER_FFMPEG_PATH", "/usr/local/bin/ffmpeg");
        env::set_var("CONVERTER_HEIF_DECODER_PATH", "/usr/bin/heif-dec");
        env::set_var("CONVERTER_BIND_ADDR", "0.0.0.0:8080");
        env::set_var("CONVERTER_LOGICAL_CORES", "12");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.paths.uploads_dir, PathBuf::from("/data/in"));
        assert_eq!(config.paths.conversions_dir, PathBuf::from("/data/out"));
        assert_eq!(config.engine.ffmpeg_path, PathBuf::from("/usr/local/bin/ffmpeg"));
        assert_eq!(config.engine.heif_decoder_path, PathBuf::from("/usr/bin/heif-dec"));
        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.workers.logical_cores, Some(12));
    }

    #[test]
    fn test_invalid_numeric_env_is_ignored() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("CONVERTER_TIMEOUT_SECS", "soon");
        env::set_var("CONVERTER_TASK_TTL_SECS", "-5");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.engine.timeout_secs, 3600);
        assert_eq!(config.registry.task_ttl_secs, 3600);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.server.bind_addr, "127.0.0.1:5000");
        assert_eq!(config.paths.uploads_dir, PathBuf::from("uploads"));
        assert_eq!(config.paths.conversions_dir, PathBuf::from("conversions"));
        assert_eq!(config.workers.logical_cores, None);
        assert_eq!(config.workers.max_concurrent_jobs, 0);
        assert_eq!(config.engine.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.engine.timeout_secs, 3600);
        assert_eq!(config.registry.task_ttl_secs, 3600);
        assert_eq!(config.registry.sweep_interval_secs, 60);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let toml_str = r#"
[workers]
logical_cores = 16
"#;
        let config = Config::parse_toml(toml_str).expect("Partial TOML should parse");

        assert_eq!(config.workers.logical_cores, Some(16));
        assert_eq!(config.workers.max_concurrent_jobs, 0);
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let config = Config::load_or_default("/nonexistent/converter.toml")
            .expect("missing file falls back to defaults");
        assert_eq!(config.paths.uploads_dir, PathBuf::from("uploads"));
    }

    #[test]
    fn test_parse_error_display() {
        let err = Config::parse_toml("[workers\n").unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse config"));
    }
}
