//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::settings::{
    DEFAULT_ALLOW_COMMENTS, DEFAULT_CACHE_ENABLED, DEFAULT_CACHE_TTL_SECONDS,
    DEFAULT_COMMENT_COOLDOWN_MINUTES, DEFAULT_FLOOD_THRESHOLD, DEFAULT_FLOOD_WINDOW_SECONDS,
    DEFAULT_POSTS_PER_PAGE,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "contentgate";
const ENV_PREFIX: &str = "CONTENTGATE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_ADMIN_PORT: u16 = 3001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CACHE_MAX_ENTRIES: u64 = 1_000;
const DEFAULT_CACHE_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_SITE_NAME: &str = "Unknown Site";

/// Command-line arguments for the contentgate binary.
#[derive(Debug, Parser)]
#[command(
    name = "contentgate",
    version,
    about = "Cached content API with comment abuse limiting"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CONTENTGATE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

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

    /// Toggle the response cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the cache entry lifetime; zero disables storage.
    #[arg(long = "cache-ttl-seconds", value_name = "SECONDS")]
    pub cache_ttl_seconds: Option<u64>,

    /// Override the per-client comment cooldown.
    #[arg(long = "comment-cooldown-minutes", value_name = "MINUTES")]
    pub comment_cooldown_minutes: Option<u64>,

    /// Override the JSON file used to seed the in-memory content store.
    #[arg(long = "content-seed-file", value_name = "PATH")]
    pub content_seed_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub comments: CommentSettings,
    pub content: ContentSettings,
    pub site: SiteSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    /// Listener for cache and settings administration, on the same host.
    pub admin_addr: SocketAddr,
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
pub struct CacheSettings {
    pub enabled: bool,
    /// Entry lifetime. Zero means reads pass straight through.
    pub ttl: Duration,
    pub max_entries: NonZeroUsize,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct CommentSettings {
    pub allow: bool,
    pub cooldown_minutes: u64,
    pub flood_threshold: NonZeroU32,
    pub flood_window: Duration,
}

#[derive(Debug, Clone)]
pub struct ContentSettings {
    pub posts_per_page: NonZeroU32,
    pub seed_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub name: String,
    pub description: String,
    pub url: String,
    pub admin_email: String,
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

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    comments: RawCommentSettings,
    content: RawContentSettings,
    site: RawSiteSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(ttl) = overrides.cache_ttl_seconds {
            self.cache.ttl_seconds = Some(ttl);
        }
        if let Some(minutes) = overrides.comment_cooldown_minutes {
            self.comments.cooldown_minutes = Some(minutes);
        }
        if let Some(path) = overrides.content_seed_file.as_ref() {
            self.content.seed_file = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            comments,
            content,
            site,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            comments: build_comment_settings(comments)?,
            content: build_content_settings(content)?,
            site: build_site_settings(site),
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

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 || admin_port == port {
        return Err(LoadError::invalid(
            "server.admin_port",
            "must be non-zero and differ from server.port",
        ));
    }
    let admin_addr = parse_socket_addr(&host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;

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
        admin_addr,
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

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let max_entries_value = cache.max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES);
    let max_entries = usize::try_from(max_entries_value)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid(
                "cache.max_entries",
                "must be greater than zero and fit in usize",
            )
        })?;

    let sweep_secs = cache
        .sweep_interval_seconds
        .unwrap_or(DEFAULT_CACHE_SWEEP_INTERVAL_SECS);
    if sweep_secs == 0 {
        return Err(LoadError::invalid(
            "cache.sweep_interval_seconds",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(DEFAULT_CACHE_ENABLED),
        ttl: Duration::from_secs(cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECONDS)),
        max_entries,
        sweep_interval: Duration::from_secs(sweep_secs),
    })
}

fn build_comment_settings(comments: RawCommentSettings) -> Result<CommentSettings, LoadError> {
    let flood_threshold = non_zero_u32(
        comments
            .flood_threshold
            .unwrap_or(u64::from(DEFAULT_FLOOD_THRESHOLD)),
        "comments.flood_threshold",
    )?;

    let window_secs = comments
        .flood_window_seconds
        .unwrap_or(DEFAULT_FLOOD_WINDOW_SECONDS);
    if window_secs == 0 {
        return Err(LoadError::invalid(
            "comments.flood_window_seconds",
            "must be greater than zero",
        ));
    }

    let cooldown_minutes = comments
        .cooldown_minutes
        .unwrap_or(DEFAULT_COMMENT_COOLDOWN_MINUTES);
    cooldown_minutes.checked_mul(60).ok_or_else(|| {
        LoadError::invalid("comments.cooldown_minutes", "value exceeds supported range")
    })?;

    Ok(CommentSettings {
        allow: comments.allow.unwrap_or(DEFAULT_ALLOW_COMMENTS),
        cooldown_minutes,
        flood_threshold,
        flood_window: Duration::from_secs(window_secs),
    })
}

fn build_content_settings(content: RawContentSettings) -> Result<ContentSettings, LoadError> {
    let posts_per_page = non_zero_u32(
        content
            .posts_per_page
            .unwrap_or(u64::from(DEFAULT_POSTS_PER_PAGE)),
        "content.posts_per_page",
    )?;

    let seed_file = content
        .seed_file
        .filter(|path| !path.as_os_str().is_empty());

    Ok(ContentSettings {
        posts_per_page,
        seed_file,
    })
}

fn build_site_settings(site: RawSiteSettings) -> SiteSettings {
    let trimmed = |value: Option<String>| {
        value
            .map(|value| value.trim().to_string())
            .unwrap_or_default()
    };

    let name = trimmed(site.name);
    SiteSettings {
        name: if name.is_empty() {
            DEFAULT_SITE_NAME.to_string()
        } else {
            name
        },
        description: trimmed(site.description),
        url: trimmed(site.url),
        admin_email: trimmed(site.admin_email),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    admin_port: Option<u16>,
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
struct RawCacheSettings {
    enabled: Option<bool>,
    ttl_seconds: Option<u64>,
    max_entries: Option<u64>,
    sweep_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCommentSettings {
    allow: Option<bool>,
    cooldown_minutes: Option<u64>,
    flood_threshold: Option<u64>,
    flood_window_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawContentSettings {
    posts_per_page: Option<u64>,
    seed_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    name: Option<String>,
    description: Option<String>,
    url: Option<String>,
    admin_email: Option<String>,
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
mod tests {
    use super::*;
    use crate::application::settings::Configuration;

    #[test]
    fn file_defaults_match_runtime_defaults() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        assert_eq!(Configuration::from(&settings), Configuration::default());
    }

    #[test]
    fn defaults_are_applied() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

        assert_eq!(settings.server.addr.to_string(), "127.0.0.1:3000");
        assert_eq!(settings.server.admin_addr.to_string(), "127.0.0.1:3001");
        assert!(settings.cache.enabled);
        assert_eq!(settings.cache.ttl, Duration::from_secs(300));
        assert_eq!(settings.cache.max_entries.get(), 1_000);
        assert_eq!(settings.cache.sweep_interval, Duration::from_secs(60));
        assert!(settings.comments.allow);
        assert_eq!(settings.comments.cooldown_minutes, 5);
        assert_eq!(settings.comments.flood_threshold.get(), 10);
        assert_eq!(settings.comments.flood_window, Duration::from_secs(60));
        assert_eq!(settings.content.posts_per_page.get(), 10);
        assert_eq!(settings.site.name, DEFAULT_SITE_NAME);
        assert!(matches!(settings.logging.format, LogFormat::Compact));
    }

    #[test]
    fn admin_port_must_differ() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(3001);
        let err = Settings::from_raw(raw).expect_err("clashing ports");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "server.admin_port",
                ..
            }
        ));
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.logging.level = Some("info".to_string());
        raw.cache.ttl_seconds = Some(600);

        let overrides = ServeOverrides {
            server_port: Some(4321),
            log_level: Some("debug".to_string()),
            cache_ttl_seconds: Some(30),
            comment_cooldown_minutes: Some(2),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert_eq!(settings.cache.ttl, Duration::from_secs(30));
        assert_eq!(settings.comments.cooldown_minutes, 2);
    }

    #[test]
    fn zero_ttl_is_allowed() {
        let mut raw = RawSettings::default();
        raw.cache.ttl_seconds = Some(0);
        let settings = Settings::from_raw(raw).expect("zero ttl is valid");
        assert!(settings.cache.ttl.is_zero());
    }

    #[test]
    fn zero_capacities_are_rejected() {
        let mut raw = RawSettings::default();
        raw.cache.max_entries = Some(0);
        let err = Settings::from_raw(raw).expect_err("zero capacity");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "cache.max_entries",
                ..
            }
        ));

        let mut raw = RawSettings::default();
        raw.comments.flood_threshold = Some(0);
        assert!(Settings::from_raw(raw).is_err());

        let mut raw = RawSettings::default();
        raw.comments.flood_window_seconds = Some(0);
        assert!(Settings::from_raw(raw).is_err());

        let mut raw = RawSettings::default();
        raw.cache.sweep_interval_seconds = Some(0);
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut raw = RawSettings::default();
        raw.logging.level = Some("loud".to_string());
        let err = Settings::from_raw(raw).expect_err("bad level");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "logging.level",
                ..
            }
        ));
    }

    #[test]
    fn invalid_host_is_rejected() {
        let mut raw = RawSettings::default();
        raw.server.host = Some("not a host".to_string());
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn cli_json_logging_enforces_format() {
        let mut raw = RawSettings::default();
        let overrides = ServeOverrides {
            log_json: Some(true),
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn default_to_serve_command() {
        let args = CliArgs::parse_from(["contentgate"]);
        let command = args
            .command
            .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
        assert!(matches!(command, Command::Serve(_)));
    }

    #[test]
    fn parse_serve_overrides() {
        let args = CliArgs::parse_from([
            "contentgate",
            "serve",
            "--server-host",
            "0.0.0.0",
            "--cache-enabled",
            "false",
            "--cache-ttl-seconds",
            "0",
        ]);

        match args.command.expect("serve command") {
            Command::Serve(serve) => {
                assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
                assert_eq!(serve.overrides.cache_enabled, Some(false));
                assert_eq!(serve.overrides.cache_ttl_seconds, Some(0));
            }
        }
    }
}
