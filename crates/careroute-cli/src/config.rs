use anyhow::{Context, Result, bail};
use careroute_core::{HandlerEndpoints, RetentionPolicy, RouterConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CarerouteConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub profiles: ProfilesConfig,
    #[serde(default)]
    pub handlers: HandlersConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

// ── Server ──────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub auth_token: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind", &self.bind)
            .field("port", &self.port)
            .field("auth_token", &mask_secret(&self.auth_token))
            .finish()
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            auth_token: String::new(),
        }
    }
}

// ── Profiles ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilesConfig {
    /// Custom profile file; the built-in set is used when absent
    #[serde(default)]
    pub path: Option<String>,
}

// ── Handlers ────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct HandlersConfig {
    #[serde(default = "default_handler_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub endpoints: HandlerEndpoints,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub auth_token: String,
}

impl std::fmt::Debug for HandlersConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlersConfig")
            .field("base_url", &self.base_url)
            .field("endpoints", &self.endpoints)
            .field("timeout_secs", &self.timeout_secs)
            .field("auth_token", &mask_secret(&self.auth_token))
            .finish()
    }
}

fn default_handler_base_url() -> String {
    "http://127.0.0.1:9000".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for HandlersConfig {
    fn default() -> Self {
        Self {
            base_url: default_handler_base_url(),
            endpoints: HandlerEndpoints::default(),
            timeout_secs: default_timeout_secs(),
            auth_token: String::new(),
        }
    }
}

// ── Storage ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub retention: RetentionPolicy,
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

fn default_db_path() -> String {
    "~/.careroute/conversations.db".to_string()
}

fn default_purge_interval() -> u64 {
    3600
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            retention: RetentionPolicy::default(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

/// Mask a secret string for safe display in Debug output / logs.
/// Shows first 3 and last 4 chars for keys longer than 7 chars, otherwise "***".
pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".careroute")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

impl CarerouteConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path.clone().unwrap_or_else(default_config_path);

        // The file may hold bearer tokens
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(&path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    bail!(
                        "Config file {:?} has overly permissive permissions ({:o}). \
                         It may contain secrets. Fix with: chmod 600 {:?}",
                        path,
                        mode & 0o777,
                        path
                    );
                }
            }
        }

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `careroute init` first.",
                path.display()
            )
        })?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;

        if !config.server.auth_token.is_empty() && !content.contains("${CAREROUTE_GATEWAY_TOKEN}") {
            warn!(
                "Gateway token is hardcoded in config file. For security, use environment variables: auth_token = \"${{CAREROUTE_GATEWAY_TOKEN}}\""
            );
        }

        Ok(config)
    }

    /// Like [`load`](Self::load), but fall back to built-in defaults when
    /// no config path was given and the default file does not exist.
    pub fn load_or_default(custom_path: &Option<PathBuf>) -> Result<Self> {
        if custom_path.is_none() && !default_config_path().exists() {
            return Ok(Self::default());
        }
        Self::load(custom_path)
    }

    /// Expand allowlisted env vars, parse and validate
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("router.confidence_threshold", self.router.confidence_threshold),
            ("router.emergency_threshold", self.router.emergency_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be between 0 and 1, got {}", name, value);
            }
        }
        if self.handlers.base_url.trim().is_empty() {
            bail!("handlers.base_url must not be empty");
        }
        if self.handlers.timeout_secs == 0 {
            bail!("handlers.timeout_secs must be at least 1");
        }
        if self.storage.purge_interval_secs == 0 {
            bail!("storage.purge_interval_secs must be at least 1");
        }
        Ok(())
    }

    /// Copy with secrets masked, for display
    pub fn redacted(&self) -> Self {
        let mut shown = self.clone();
        shown.server.auth_token = mask_secret(&self.server.auth_token);
        shown.handlers.auth_token = mask_secret(&self.handlers.auth_token);
        shown
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(s: &str) -> PathBuf {
    match (s.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(s),
    }
}

/// Allowlist of environment variable names that may be expanded in config files.
/// This prevents an attacker who can modify the config from reading arbitrary env vars.
const ALLOWED_ENV_VARS: &[&str] = &[
    "CAREROUTE_GATEWAY_TOKEN",
    "CAREROUTE_HANDLER_TOKEN",
    "CAREROUTE_HANDLER_BASE_URL",
];

fn expand_env_vars(s: &str) -> String {
    expand_env_vars_with(s, |name| std::env::var(name).ok())
}

fn expand_env_vars_with(s: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while let Some(start) = result[pos..].find("${") {
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            pos = abs_start + end + 1;
            continue;
        }

        let value = lookup(&var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value.len();
    }
    result
}
