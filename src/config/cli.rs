use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the fastcache binary.
#[derive(Debug, Parser)]
#[command(name = "fastcache", version, about = "Tiered full-page caching proxy")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "FASTCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the caching proxy.
    Serve(Box<ServeArgs>),
    /// Print the cache key derived for a URL.
    Key(KeyArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct KeyArgs {
    /// Absolute page URL, e.g. `https://shop.example.com/women.html`.
    #[arg(long, value_name = "URL")]
    pub url: String,

    /// Variation token, as carried by the vary cookie.
    #[arg(long, value_name = "TOKEN")]
    pub vary: Option<String>,

    /// Derive the key as if the request arrived over HTTPS.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub https: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the backend host (and optional port).
    #[arg(long = "backend-host", value_name = "HOST")]
    pub backend_host: Option<String>,

    /// Override the backend scheme (http|https).
    #[arg(long = "backend-scheme", value_name = "SCHEME")]
    pub backend_scheme: Option<String>,

    /// Override the backend request timeout.
    #[arg(long = "backend-timeout-seconds", value_name = "SECONDS")]
    pub backend_timeout_seconds: Option<u64>,

    /// Toggle the in-process page cache.
    #[arg(
        long = "cache-local-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_local_enabled: Option<bool>,

    /// Override how long cached pages stay fresh.
    #[arg(long = "cache-fresh-ttl-seconds", value_name = "SECONDS")]
    pub cache_fresh_ttl_seconds: Option<u64>,

    /// Toggle serving expired pages while they are refreshed.
    #[arg(
        long = "cache-stale-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_stale_enabled: Option<bool>,

    /// Override how long expired pages stay servable.
    #[arg(long = "cache-stale-ttl-seconds", value_name = "SECONDS")]
    pub cache_stale_ttl_seconds: Option<u64>,

    /// Toggle diagnostic headers and the HTML debug footer.
    #[arg(
        long = "cache-diagnostics",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_diagnostics: Option<bool>,

    /// Override the shared store URL, e.g. `redis://127.0.0.1:6379/11`.
    #[arg(long = "remote-url", value_name = "URL")]
    pub remote_url: Option<String>,

    /// Override the admitted request rate.
    #[arg(long = "admission-rate-per-second", value_name = "COUNT")]
    pub admission_rate_per_second: Option<u64>,

    /// Override the admission burst size.
    #[arg(long = "admission-burst", value_name = "COUNT")]
    pub admission_burst: Option<u64>,
}
