use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

/// Root application configuration. Built once at startup by
/// [`ConfigLoader`] and shared read-only afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub logs: LogsConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub urls: UrlsConfig,
    #[serde(default = "default_public_dirs")]
    pub public_dirs: Vec<String>,
    #[serde(default = "default_views")]
    pub views: Vec<String>,
    #[serde(default)]
    pub locales: LocalesConfig,
    #[serde(default)]
    pub feature_flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub business_flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub disable_compression: bool,
    #[serde(default = "default_true")]
    pub request_logging: bool,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Directory relative paths (views, public dirs, locales) resolve against.
    #[serde(skip)]
    pub app_root: PathBuf,
    /// Application specific settings, read with [`AppConfig::lookup`].
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_name")]
    pub name: String,
    #[serde(default = "default_session_secret")]
    pub secret: String,
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default)]
    pub secure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrlsConfig {
    #[serde(default = "default_public_url")]
    pub public: String,
    #[serde(default = "default_version_url")]
    pub version: Option<String>,
    #[serde(default = "default_healthcheck_url")]
    pub healthcheck: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalesConfig {
    #[serde(default = "default_locale_dirs")]
    pub dirs: Vec<String>,
    #[serde(default = "default_locale")]
    pub default: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_app_name() -> String {
    "govform".to_string()
}
fn default_env() -> String {
    "development".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_true() -> bool {
    true
}
fn default_public_dirs() -> Vec<String> {
    vec!["public".to_string()]
}
fn default_views() -> Vec<String> {
    vec!["views".to_string()]
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> LogFormat {
    LogFormat::Json
}
fn default_redis_port() -> u16 {
    6379
}
fn default_key_prefix() -> String {
    "sess".to_string()
}
fn default_session_name() -> String {
    "govform.sid".to_string()
}
fn default_session_secret() -> String {
    "changeme".to_string()
}
fn default_session_ttl_secs() -> u64 {
    1800
}
fn default_public_url() -> String {
    "/public".to_string()
}
fn default_version_url() -> Option<String> {
    Some("/version".to_string())
}
fn default_healthcheck_url() -> Option<String> {
    Some("/healthcheck".to_string())
}
fn default_locale_dirs() -> Vec<String> {
    vec!["locales".to_string()]
}
fn default_locale() -> String {
    "en".to_string()
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            host: None,
            port: default_redis_port(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: default_session_name(),
            secret: default_session_secret(),
            ttl_secs: default_session_ttl_secs(),
            secure: false,
        }
    }
}

impl Default for UrlsConfig {
    fn default() -> Self {
        Self {
            public: default_public_url(),
            version: default_version_url(),
            healthcheck: default_healthcheck_url(),
        }
    }
}

impl Default for LocalesConfig {
    fn default() -> Self {
        Self {
            dirs: default_locale_dirs(),
            default: default_locale(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            env: default_env(),
            host: default_host(),
            port: default_port(),
            logs: LogsConfig::default(),
            redis: RedisConfig::default(),
            session: SessionConfig::default(),
            urls: UrlsConfig::default(),
            public_dirs: default_public_dirs(),
            views: default_views(),
            locales: LocalesConfig::default(),
            feature_flags: BTreeMap::new(),
            business_flags: BTreeMap::new(),
            disable_compression: false,
            request_logging: true,
            metrics: MetricsConfig::default(),
            app_root: PathBuf::new(),
            extra: Map::new(),
        }
    }
}

impl UrlsConfig {
    pub fn version_path(&self) -> Option<&str> {
        self.version.as_deref().filter(|p| !p.is_empty())
    }

    pub fn healthcheck_path(&self) -> Option<&str> {
        self.healthcheck.as_deref().filter(|p| !p.is_empty())
    }
}

impl AppConfig {
    /// Load configuration with the default layering rooted at `app_root`.
    pub fn load(app_root: impl Into<PathBuf>) -> Result<Self, config::ConfigError> {
        ConfigLoader::new(app_root).load()
    }

    pub fn is_production(&self) -> bool {
        self.env.eq_ignore_ascii_case("production")
    }

    /// Reads an application setting by dot path, e.g. `costs.adult`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.extra.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn lookup_str(&self, path: &str) -> Option<&str> {
        self.lookup(path).and_then(Value::as_str)
    }

    pub fn lookup_i64(&self, path: &str) -> Option<i64> {
        self.lookup(path).and_then(|v| match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
    }

    /// Resolves a configured directory against `app_root`.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.app_root.join(path)
        }
    }
}

/// Layered configuration builder.
///
/// Sources, lowest priority first: default files, extra files (`-c`),
/// the document held in `env_var_name`, then `GOVFORM__*` variables.
/// A seed replaces all of them.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    app_root: PathBuf,
    seed: Option<Value>,
    default_files: Vec<String>,
    extra_files: Vec<PathBuf>,
    env_var_name: Option<String>,
    env_prefix: Option<String>,
    environment: Option<HashMap<String, String>>,
}

pub const DEFAULT_FILES: &[&str] = &["config/default"];
pub const DEFAULT_ENV_VAR: &str = "GOVFORM_CONFIG";
pub const DEFAULT_ENV_PREFIX: &str = "GOVFORM";

impl ConfigLoader {
    pub fn new(app_root: impl Into<PathBuf>) -> Self {
        Self {
            app_root: app_root.into(),
            seed: None,
            default_files: DEFAULT_FILES.iter().map(|f| f.to_string()).collect(),
            extra_files: Vec::new(),
            env_var_name: Some(DEFAULT_ENV_VAR.to_string()),
            env_prefix: Some(DEFAULT_ENV_PREFIX.to_string()),
            environment: None,
        }
    }

    /// Use `seed` as the whole configuration; files and environment are ignored.
    pub fn with_seed(mut self, seed: Value) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Replace the default file stems (extension is discovered).
    pub fn with_default_files(mut self, files: Vec<String>) -> Self {
        self.default_files = files;
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.extra_files.push(file.into());
        self
    }

    pub fn with_env_var_name(mut self, name: Option<String>) -> Self {
        self.env_var_name = name;
        self
    }

    pub fn with_env_prefix(mut self, prefix: Option<String>) -> Self {
        self.env_prefix = prefix;
        self
    }

    /// Read variables from `vars` instead of the process environment.
    pub fn with_environment(mut self, vars: HashMap<String, String>) -> Self {
        self.environment = Some(vars);
        self
    }

    fn env_value(&self, name: &str) -> Option<String> {
        match &self.environment {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
    }

    pub fn load(&self) -> Result<AppConfig, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(seed) = &self.seed {
            debug!("Using seed config");
            let text = serde_json::to_string(seed)
                .map_err(|e| config::ConfigError::Message(e.to_string()))?;
            builder = builder.add_source(config::File::from_str(&text, config::FileFormat::Json));
        } else {
            for stem in &self.default_files {
                let path = self.app_root.join(stem);
                debug!(file = %path.display(), "Adding default config file");
                builder = builder.add_source(
                    config::File::with_name(&path.to_string_lossy()).required(false),
                );
            }

            for file in &self.extra_files {
                let path = if file.is_absolute() {
                    file.clone()
                } else {
                    self.app_root.join(file)
                };
                debug!(file = %path.display(), "Adding command line config file");
                builder = builder.add_source(config::File::from(path));
            }

            if let Some(name) = &self.env_var_name {
                if let Some(text) = self.env_value(name) {
                    debug!(var = %name, "Adding config from environment variable");
                    // YAML is a superset of JSON, so both are accepted.
                    builder = builder
                        .add_source(config::File::from_str(&text, config::FileFormat::Yaml));
                }
            }

            if let Some(prefix) = &self.env_prefix {
                builder = builder.add_source(
                    config::Environment::with_prefix(prefix)
                        .separator("__")
                        .try_parsing(true)
                        .list_separator(",")
                        .with_list_parse_key("public_dirs")
                        .with_list_parse_key("views")
                        .source(self.environment.clone()),
                );
            }
        }

        let mut app: AppConfig = builder.build()?.try_deserialize()?;
        app.app_root = self.app_root.clone();
        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn isolated(root: &Path) -> ConfigLoader {
        ConfigLoader::new(root).with_environment(HashMap::new())
    }

    #[test]
    fn test_defaults_without_sources() {
        let dir = std::env::temp_dir().join("govform-config-defaults");
        let config = isolated(&dir).load().unwrap();
        assert_eq!(config.app_name, "govform");
        assert_eq!(config.port, 3000);
        assert_eq!(config.urls.public, "/public");
        assert_eq!(config.urls.version_path(), Some("/version"));
        assert_eq!(config.session.name, "govform.sid");
        assert!(config.request_logging);
        assert_eq!(config.app_root, dir);
    }

    #[test]
    fn test_seed_replaces_sources() {
        let config = isolated(Path::new("/srv/app"))
            .with_seed(json!({
                "app_name": "passport",
                "port": 8081,
                "costs": {"adult": 7500, "child": 4900}
            }))
            .load()
            .unwrap();

        assert_eq!(config.app_name, "passport");
        assert_eq!(config.port, 8081);
        assert_eq!(config.lookup_i64("costs.adult"), Some(7500));
        assert_eq!(config.lookup("costs.missing"), None);
        assert_eq!(config.lookup("nothing.here"), None);
    }

    #[test]
    fn test_env_document_overrides_files() {
        let dir = std::env::temp_dir().join("govform-config-env-doc");
        std::fs::create_dir_all(dir.join("config")).unwrap();
        std::fs::write(
            dir.join("config/default.json"),
            r#"{"app_name": "from-file", "port": 4000}"#,
        )
        .unwrap();

        let mut vars = HashMap::new();
        vars.insert(DEFAULT_ENV_VAR.to_string(), "port: 5000".to_string());
        let config = ConfigLoader::new(&dir)
            .with_environment(vars)
            .load()
            .unwrap();

        assert_eq!(config.app_name, "from-file");
        assert_eq!(config.port, 5000);
    }

    #[test]
    fn test_command_line_file_layered_after_defaults() {
        let dir = std::env::temp_dir().join("govform-config-cli-file");
        std::fs::create_dir_all(dir.join("config")).unwrap();
        std::fs::write(dir.join("config/default.json"), r#"{"port": 4000}"#).unwrap();
        std::fs::write(dir.join("local.json"), r#"{"port": 4100, "env": "test"}"#).unwrap();

        let config = isolated(&dir).with_file("local.json").load().unwrap();

        assert_eq!(config.port, 4100);
        assert_eq!(config.env, "test");
    }

    #[test]
    fn test_disabled_urls() {
        let config = isolated(Path::new("."))
            .with_seed(json!({"urls": {"version": "", "healthcheck": ""}}))
            .load()
            .unwrap();
        assert_eq!(config.urls.version_path(), None);
        assert_eq!(config.urls.healthcheck_path(), None);
        assert_eq!(config.urls.public, "/public");
    }

    #[test]
    fn test_resolve_path() {
        let mut config = AppConfig::default();
        config.app_root = PathBuf::from("/srv/app");
        assert_eq!(config.resolve_path("views"), PathBuf::from("/srv/app/views"));
        assert_eq!(config.resolve_path("/abs/views"), PathBuf::from("/abs/views"));
    }
}
