//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use cli::{CliArgs, Command, KeyArgs, ServeArgs, ServeOverrides};

use crate::cache::{
    DEFAULT_EXCLUDED_PREFIXES, DEFAULT_MAX_INFLATED_BYTES, DEFAULT_STATIC_EXTENSIONS,
    DEFAULT_VARY_COOKIE,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "fastcache";
const ENV_PREFIX: &str = "FASTCACHE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_BACKEND_SCHEME: &str = "https";
const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BACKEND_POOL_MAX_IDLE_PER_HOST: usize = 10;
const DEFAULT_BACKEND_POOL_IDLE_TIMEOUT_SECS: u64 = 90;
const DEFAULT_BACKEND_MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_CACHE_FRESH_TTL_SECS: u64 = 60;
const DEFAULT_CACHE_STALE_TTL_SECS: u64 = 432_000;
const DEFAULT_CACHE_MAX_ENTRIES: u64 = 10_000;
const DEFAULT_CACHE_PURGE_INTERVAL_SECS: u64 = 60;
const DEFAULT_ADMISSION_RATE_PER_SECOND: u64 = 250;
const DEFAULT_ADMISSION_BURST: u64 = 500;
const DEFAULT_ADMISSION_MAX_WAIT_MS: u64 = 1_000;
pub(crate) const DEFAULT_ADMIN_SECRET_KEY: &str = "changeme";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub backend: BackendSettings,
    pub cache: CacheSettings,
    pub remote: RemoteSettings,
    pub admission: AdmissionSettings,
    pub admin: AdminSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// `scheme://host[:port]` every origin request is resolved against.
    pub base_url: Url,
    pub timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
    pub max_body_bytes: usize,
    /// Ceiling on a gunzipped origin response.
    pub max_response_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub local_enabled: bool,
    pub fresh_ttl: Duration,
    pub stale_enabled: bool,
    pub stale_ttl: Duration,
    pub max_entries: NonZeroUsize,
    pub purge_interval: Duration,
    pub force_https: bool,
    pub key_host: Option<String>,
    pub vary_cookie: String,
    pub diagnostics: bool,
    pub excluded_prefixes: Vec<String>,
    pub static_extensions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub url: Option<String>,
    /// Prepended to every cache key before it is looked up.
    pub key_prefix: String,
    /// Read values with `HGET key <field>` instead of `GET key`.
    pub hash_field: Option<String>,
    /// Ceiling on an inflated stored value; larger values are misses.
    pub max_value_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct AdmissionSettings {
    pub rate_per_second: NonZeroU32,
    pub burst: NonZeroU32,
    /// Longest a request may queue for a token; zero rejects immediately.
    pub max_wait: Duration,
}

#[derive(Debug, Clone)]
pub struct AdminSettings {
    pub secret_key: String,
}

impl AdminSettings {
    pub fn uses_default_secret(&self) -> bool {
        self.secret_key == DEFAULT_ADMIN_SECRET_KEY
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut raw = load_raw(cli)?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Key(_)) | None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Load only the cache section; used by commands that never contact the backend.
pub fn load_cache(cli: &CliArgs) -> Result<CacheSettings, LoadError> {
    build_cache_settings(load_raw(cli)?.cache)
}

fn load_raw(cli: &CliArgs) -> Result<RawSettings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(environment_source());

    Ok(builder.build()?.try_deserialize()?)
}

/// `FASTCACHE__SECTION__KEY` variables. Scalars are typed on read; only the
/// two list keys are split on commas.
fn environment_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("cache.excluded_prefixes")
        .with_list_parse_key("cache.static_extensions")
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    backend: RawBackendSettings,
    cache: RawCacheSettings,
    remote: RawRemoteSettings,
    admission: RawAdmissionSettings,
    admin: RawAdminSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(host) = overrides.backend_host.as_ref() {
            self.backend.host = Some(host.clone());
        }
        if let Some(scheme) = overrides.backend_scheme.as_ref() {
            self.backend.scheme = Some(scheme.clone());
        }
        if let Some(seconds) = overrides.backend_timeout_seconds {
            self.backend.timeout_seconds = Some(seconds);
        }
        if let Some(enabled) = overrides.cache_local_enabled {
            self.cache.local_enabled = Some(enabled);
        }
        if let Some(seconds) = overrides.cache_fresh_ttl_seconds {
            self.cache.fresh_ttl_seconds = Some(seconds);
        }
        if let Some(enabled) = overrides.cache_stale_enabled {
            self.cache.stale_enabled = Some(enabled);
        }
        if let Some(seconds) = overrides.cache_stale_ttl_seconds {
            self.cache.stale_ttl_seconds = Some(seconds);
        }
        if let Some(enabled) = overrides.cache_diagnostics {
            self.cache.diagnostics = Some(enabled);
        }
        if let Some(url) = overrides.remote_url.as_ref() {
            self.remote.url = Some(url.clone());
        }
        if let Some(rate) = overrides.admission_rate_per_second {
            self.admission.rate_per_second = Some(rate);
        }
        if let Some(burst) = overrides.admission_burst {
            self.admission.burst = Some(burst);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            backend,
            cache,
            remote,
            admission,
            admin,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            backend: build_backend_settings(backend)?,
            cache: build_cache_settings(cache)?,
            remote: build_remote_settings(remote)?,
            admission: build_admission_settings(admission)?,
            admin: build_admin_settings(admin)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_backend_settings(backend: RawBackendSettings) -> Result<BackendSettings, LoadError> {
    let host = non_blank(backend.host)
        .ok_or_else(|| LoadError::invalid("backend.host", "must be set"))?;

    let scheme = non_blank(backend.scheme)
        .unwrap_or_else(|| DEFAULT_BACKEND_SCHEME.to_string())
        .to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(LoadError::invalid(
            "backend.scheme",
            format!("expected `http` or `https`, got `{scheme}`"),
        ));
    }

    let candidate = format!("{scheme}://{host}");
    let base_url = Url::parse(&candidate)
        .map_err(|err| LoadError::invalid("backend.host", format!("`{candidate}`: {err}")))?;
    if base_url.path() != "/" || base_url.query().is_some() {
        return Err(LoadError::invalid(
            "backend.host",
            "must be a bare host with optional port",
        ));
    }

    let timeout_secs = backend
        .timeout_seconds
        .unwrap_or(DEFAULT_BACKEND_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "backend.timeout_seconds",
            "must be greater than zero",
        ));
    }

    let max_body_bytes = byte_limit(
        "backend.max_body_bytes",
        backend.max_body_bytes,
        DEFAULT_BACKEND_MAX_BODY_BYTES,
    )?;
    let max_response_bytes = byte_limit(
        "backend.max_response_bytes",
        backend.max_response_bytes,
        DEFAULT_MAX_INFLATED_BYTES as u64,
    )?;

    Ok(BackendSettings {
        base_url,
        timeout: Duration::from_secs(timeout_secs),
        pool_max_idle_per_host: backend
            .pool_max_idle_per_host
            .unwrap_or(DEFAULT_BACKEND_POOL_MAX_IDLE_PER_HOST),
        pool_idle_timeout: Duration::from_secs(
            backend
                .pool_idle_timeout_seconds
                .unwrap_or(DEFAULT_BACKEND_POOL_IDLE_TIMEOUT_SECS),
        ),
        max_body_bytes,
        max_response_bytes,
    })
}

fn byte_limit(key: &'static str, value: Option<u64>, default: u64) -> Result<usize, LoadError> {
    let value = value.unwrap_or(default);
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    usize::try_from(value)
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let fresh_ttl_secs = cache
        .fresh_ttl_seconds
        .unwrap_or(DEFAULT_CACHE_FRESH_TTL_SECS);
    if fresh_ttl_secs == 0 {
        return Err(LoadError::invalid(
            "cache.fresh_ttl_seconds",
            "must be greater than zero",
        ));
    }

    let purge_secs = cache
        .purge_interval_seconds
        .unwrap_or(DEFAULT_CACHE_PURGE_INTERVAL_SECS);
    if purge_secs == 0 {
        return Err(LoadError::invalid(
            "cache.purge_interval_seconds",
            "must be greater than zero",
        ));
    }

    let max_entries_value = cache.max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES);
    let max_entries = usize::try_from(max_entries_value)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| LoadError::invalid("cache.max_entries", "must be greater than zero"))?;

    let vary_cookie =
        non_blank(cache.vary_cookie).unwrap_or_else(|| DEFAULT_VARY_COOKIE.to_string());

    let excluded_prefixes = cache.excluded_prefixes.unwrap_or_else(|| {
        DEFAULT_EXCLUDED_PREFIXES
            .iter()
            .map(|prefix| prefix.to_string())
            .collect()
    });
    if let Some(prefix) = excluded_prefixes.iter().find(|p| !p.starts_with('/')) {
        return Err(LoadError::invalid(
            "cache.excluded_prefixes",
            format!("`{prefix}` must start with `/`"),
        ));
    }

    let static_extensions = cache.static_extensions.unwrap_or_else(|| {
        DEFAULT_STATIC_EXTENSIONS
            .iter()
            .map(|ext| ext.to_string())
            .collect()
    });

    Ok(CacheSettings {
        local_enabled: cache.local_enabled.unwrap_or(false),
        fresh_ttl: Duration::from_secs(fresh_ttl_secs),
        stale_enabled: cache.stale_enabled.unwrap_or(true),
        stale_ttl: Duration::from_secs(
            cache
                .stale_ttl_seconds
                .unwrap_or(DEFAULT_CACHE_STALE_TTL_SECS),
        ),
        max_entries,
        purge_interval: Duration::from_secs(purge_secs),
        force_https: cache.force_https.unwrap_or(true),
        key_host: non_blank(cache.key_host),
        vary_cookie,
        diagnostics: cache.diagnostics.unwrap_or(false),
        excluded_prefixes,
        static_extensions,
    })
}

fn build_remote_settings(remote: RawRemoteSettings) -> Result<RemoteSettings, LoadError> {
    Ok(RemoteSettings {
        url: non_blank(remote.url),
        key_prefix: remote.key_prefix.unwrap_or_default(),
        hash_field: non_blank(remote.hash_field),
        max_value_bytes: byte_limit(
            "remote.max_value_bytes",
            remote.max_value_bytes,
            DEFAULT_MAX_INFLATED_BYTES as u64,
        )?,
    })
}

fn build_admission_settings(
    admission: RawAdmissionSettings,
) -> Result<AdmissionSettings, LoadError> {
    let rate = admission
        .rate_per_second
        .unwrap_or(DEFAULT_ADMISSION_RATE_PER_SECOND);
    let burst = admission.burst.unwrap_or(DEFAULT_ADMISSION_BURST);

    Ok(AdmissionSettings {
        rate_per_second: non_zero_u32(rate, "admission.rate_per_second")?,
        burst: non_zero_u32(burst, "admission.burst")?,
        max_wait: Duration::from_millis(
            admission
                .max_wait_ms
                .unwrap_or(DEFAULT_ADMISSION_MAX_WAIT_MS),
        ),
    })
}

fn build_admin_settings(admin: RawAdminSettings) -> Result<AdminSettings, LoadError> {
    let secret_key = match admin.secret_key {
        Some(secret) if secret.trim().is_empty() => {
            return Err(LoadError::invalid(
                "admin.secret_key",
                "must not be empty",
            ));
        }
        Some(secret) => secret,
        None => DEFAULT_ADMIN_SECRET_KEY.to_string(),
    };
    Ok(AdminSettings { secret_key })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBackendSettings {
    scheme: Option<String>,
    host: Option<String>,
    timeout_seconds: Option<u64>,
    pool_max_idle_per_host: Option<usize>,
    pool_idle_timeout_seconds: Option<u64>,
    max_body_bytes: Option<u64>,
    max_response_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    local_enabled: Option<bool>,
    fresh_ttl_seconds: Option<u64>,
    stale_enabled: Option<bool>,
    stale_ttl_seconds: Option<u64>,
    max_entries: Option<u64>,
    purge_interval_seconds: Option<u64>,
    force_https: Option<bool>,
    key_host: Option<String>,
    vary_cookie: Option<String>,
    diagnostics: Option<bool>,
    excluded_prefixes: Option<Vec<String>>,
    static_extensions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRemoteSettings {
    url: Option<String>,
    key_prefix: Option<String>,
    hash_field: Option<String>,
    max_value_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAdmissionSettings {
    rate_per_second: Option<u64>,
    burst: Option<u64>,
    max_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAdminSettings {
    secret_key: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests;
