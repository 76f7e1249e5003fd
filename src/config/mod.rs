//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::application::compression::CompressionOptions;
use crate::domain::Orientation;
use crate::domain::listing::MAX_PAGE_SIZE;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pictura";
const ENV_PREFIX: &str = "PICTURA";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8787;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 10;
const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8787";
const DEFAULT_API_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LIST_STALE_SECS: u64 = 5 * 60;
const DEFAULT_DETAIL_STALE_SECS: u64 = 30 * 60;
const DEFAULT_CACHE_ENTRY_LIMIT: usize = 256;
const DEFAULT_PAGE_SIZE: u32 = 24;
const DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES: u64 = 10 * 1024 * 1024;

/// Command-line arguments for the pictura binary.
#[derive(Debug, Parser)]
#[command(name = "pictura", version, about = "Gallery listing cache and image compression service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PICTURA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the compression HTTP service.
    Serve(Box<ServeArgs>),
    /// Browse and edit the remote gallery through the listing cache.
    Images(ImagesArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
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
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the maximum request size for uploads in bytes.
    #[arg(long = "uploads-max-request-bytes", value_name = "BYTES")]
    pub uploads_max_request_bytes: Option<u64>,

    /// Override the default encode quality.
    #[arg(long = "compression-quality", value_name = "QUALITY")]
    pub compression_quality: Option<u32>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ApiOverrides {
    /// Override the gallery API base URL.
    #[arg(long = "api-base-url", value_name = "URL")]
    pub api_base_url: Option<String>,

    /// Override the gallery API request timeout.
    #[arg(long = "api-timeout-seconds", value_name = "SECONDS")]
    pub api_timeout_seconds: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct ImagesArgs {
    #[command(flatten)]
    pub api: ApiOverrides,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(subcommand)]
    pub command: ImagesCommand,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ListingArgs {
    /// Page size; defaults to `cache.page_size`.
    #[arg(long, value_name = "COUNT")]
    pub limit: Option<u32>,

    /// Only images carrying this tag.
    #[arg(long, value_name = "TAG")]
    pub tag: Option<String>,

    /// Only images with this orientation (landscape|portrait|square).
    #[arg(long, value_name = "ORIENTATION")]
    pub orientation: Option<Orientation>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum ImagesCommand {
    /// Print one listing page.
    List {
        #[command(flatten)]
        listing: ListingArgs,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Load an infinite listing page by page.
    Scroll {
        #[command(flatten)]
        listing: ListingArgs,
        /// Number of pages to load.
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Print one image.
    Show { id: String },
    /// Change tags or expiry of an image.
    Update {
        id: String,
        /// Replacement tag; repeat for several.
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,
        #[arg(long = "expiry-minutes", value_name = "MINUTES")]
        expiry_minutes: Option<u32>,
    },
    /// Delete an image.
    Delete { id: String },
    /// Print every known tag.
    Tags,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub api: ApiSettings,
    pub cache: CacheSettings,
    pub compression: CompressionOptions,
    pub uploads: UploadSettings,
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
pub struct ApiSettings {
    pub base_url: Url,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub list_stale: Duration,
    pub detail_stale: Duration,
    pub entry_limit: NonZeroUsize,
    pub page_size: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub max_request_bytes: NonZeroU64,
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
        Some(Command::Images(args)) => {
            raw.apply_logging_overrides(&args.logging);
            raw.apply_api_overrides(&args.api);
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    api: RawApiSettings,
    cache: RawCacheSettings,
    compression: RawCompressionSettings,
    uploads: RawUploadSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_logging_overrides(&overrides.logging);
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(bytes) = overrides.uploads_max_request_bytes {
            self.uploads.max_request_bytes = Some(bytes);
        }
        if let Some(quality) = overrides.compression_quality {
            self.compression.quality = Some(quality);
        }
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_api_overrides(&mut self, overrides: &ApiOverrides) {
        if let Some(url) = overrides.api_base_url.as_ref() {
            self.api.base_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.api_timeout_seconds {
            self.api.timeout_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            api,
            cache,
            compression,
            uploads,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            api: build_api_settings(api)?,
            cache: build_cache_settings(cache)?,
            compression: build_compression_settings(compression)?,
            uploads: build_upload_settings(uploads)?,
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

fn build_api_settings(api: RawApiSettings) -> Result<ApiSettings, LoadError> {
    let raw_url = api
        .base_url
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
    let base_url = Url::parse(raw_url.trim())
        .map_err(|err| LoadError::invalid("api.base_url", format!("failed to parse: {err}")))?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "api.base_url",
            "scheme must be http or https",
        ));
    }

    let timeout_secs = api.timeout_seconds.unwrap_or(DEFAULT_API_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "api.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ApiSettings {
        base_url,
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let list_stale = cache.list_stale_seconds.unwrap_or(DEFAULT_LIST_STALE_SECS);
    let detail_stale = cache
        .detail_stale_seconds
        .unwrap_or(DEFAULT_DETAIL_STALE_SECS);

    let entry_limit = NonZeroUsize::new(cache.entry_limit.unwrap_or(DEFAULT_CACHE_ENTRY_LIMIT))
        .ok_or_else(|| LoadError::invalid("cache.entry_limit", "must be greater than zero"))?;

    let page_size = cache.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size > MAX_PAGE_SIZE {
        return Err(LoadError::invalid(
            "cache.page_size",
            format!("must not exceed {MAX_PAGE_SIZE}"),
        ));
    }
    let page_size = NonZeroU32::new(page_size)
        .ok_or_else(|| LoadError::invalid("cache.page_size", "must be greater than zero"))?;

    Ok(CacheSettings {
        list_stale: Duration::from_secs(list_stale),
        detail_stale: Duration::from_secs(detail_stale),
        entry_limit,
        page_size,
    })
}

fn build_compression_settings(
    compression: RawCompressionSettings,
) -> Result<CompressionOptions, LoadError> {
    let defaults = CompressionOptions::default();

    let quality = compression.quality.unwrap_or(defaults.quality);
    if !(1..=100).contains(&quality) {
        return Err(LoadError::invalid(
            "compression.quality",
            "must be between 1 and 100",
        ));
    }
    let max_width = non_zero_dimension(
        compression.max_width.unwrap_or(defaults.max_width),
        "compression.max_width",
    )?;
    let max_height = non_zero_dimension(
        compression.max_height.unwrap_or(defaults.max_height),
        "compression.max_height",
    )?;

    Ok(CompressionOptions {
        quality,
        max_width,
        max_height,
        preserve_animation: compression
            .preserve_animation
            .unwrap_or(defaults.preserve_animation),
        generate_webp: compression.generate_webp.unwrap_or(defaults.generate_webp),
        generate_avif: compression.generate_avif.unwrap_or(defaults.generate_avif),
    })
}

fn build_upload_settings(uploads: RawUploadSettings) -> Result<UploadSettings, LoadError> {
    let max_request_bytes_value = uploads
        .max_request_bytes
        .unwrap_or(DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES);
    let max_request_bytes = NonZeroU64::new(max_request_bytes_value).ok_or_else(|| {
        LoadError::invalid("uploads.max_request_bytes", "must be greater than zero")
    })?;
    usize::try_from(max_request_bytes_value).map_err(|_| {
        LoadError::invalid(
            "uploads.max_request_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(UploadSettings { max_request_bytes })
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
struct RawApiSettings {
    base_url: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    list_stale_seconds: Option<u64>,
    detail_stale_seconds: Option<u64>,
    entry_limit: Option<usize>,
    page_size: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCompressionSettings {
    quality: Option<u32>,
    max_width: Option<u32>,
    max_height: Option<u32>,
    preserve_animation: Option<bool>,
    generate_webp: Option<bool>,
    generate_avif: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUploadSettings {
    max_request_bytes: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_dimension(value: u32, key: &'static str) -> Result<u32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(value)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve() {
        let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
        assert_eq!(settings.server.addr.to_string(), "127.0.0.1:8787");
        assert_eq!(settings.api.base_url.as_str(), "http://127.0.0.1:8787/");
        assert_eq!(settings.api.timeout, Duration::from_secs(30));
        assert_eq!(settings.cache.list_stale, Duration::from_secs(300));
        assert_eq!(settings.cache.detail_stale, Duration::from_secs(1800));
        assert_eq!(settings.cache.entry_limit.get(), 256);
        assert_eq!(settings.cache.page_size.get(), 24);
        assert_eq!(settings.compression, CompressionOptions::default());
        assert_eq!(
            settings.uploads.max_request_bytes.get(),
            DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES
        );
    }

    #[test]
    fn cli_overrides_take_highest_precedence() {
        let mut raw = RawSettings::default();
        raw.server.port = Some(4000);
        raw.logging.level = Some("info".to_string());

        let overrides = ServeOverrides {
            server_port: Some(4321),
            logging: LoggingOverrides {
                log_level: Some("debug".to_string()),
                log_json: Some(true),
            },
            ..Default::default()
        };

        raw.apply_serve_overrides(&overrides);
        let settings = Settings::from_raw(raw).expect("valid settings");

        assert_eq!(settings.server.addr.port(), 4321);
        assert_eq!(settings.logging.level, LevelFilter::DEBUG);
        assert!(matches!(settings.logging.format, LogFormat::Json));
    }

    #[test]
    fn cache_page_size_is_bounded() {
        let mut raw = RawSettings::default();
        raw.cache.page_size = Some(MAX_PAGE_SIZE + 1);
        let err = Settings::from_raw(raw).expect_err("page size too large");
        assert!(matches!(
            err,
            LoadError::Invalid {
                key: "cache.page_size",
                ..
            }
        ));
    }

    #[test]
    fn compression_quality_must_be_in_range() {
        let mut raw = RawSettings::default();
        raw.compression.quality = Some(0);
        assert!(Settings::from_raw(raw).is_err());
    }

    #[test]
    fn api_base_url_must_be_http() {
        let mut raw = RawSettings::default();
        raw.api.base_url = Some("ftp://example.com".into());
        let err = Settings::from_raw(raw).expect_err("unsupported scheme");
        assert!(matches!(err, LoadError::Invalid { key: "api.base_url", .. }));
    }

    #[test]
    fn default_to_serve_command() {
        let args = CliArgs::parse_from(["pictura"]);
        let command = args
            .command
            .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
        assert!(matches!(command, Command::Serve(_)));
    }

    #[test]
    fn parse_images_update_arguments() {
        let args = CliArgs::parse_from([
            "pictura",
            "images",
            "--api-base-url",
            "https://gallery.example",
            "update",
            "abc",
            "--tag",
            "cat",
            "--tag",
            "dog",
            "--expiry-minutes",
            "60",
        ]);

        let Some(Command::Images(images)) = args.command else {
            panic!("wrong command parsed");
        };
        assert_eq!(
            images.api.api_base_url.as_deref(),
            Some("https://gallery.example")
        );
        match images.command {
            ImagesCommand::Update {
                id,
                tags,
                expiry_minutes,
            } => {
                assert_eq!(id, "abc");
                assert_eq!(tags, vec!["cat".to_string(), "dog".to_string()]);
                assert_eq!(expiry_minutes, Some(60));
            }
            other => panic!("wrong images command parsed: {other:?}"),
        }
    }

    #[test]
    fn parse_images_scroll_with_filters() {
        let args = CliArgs::parse_from([
            "pictura",
            "images",
            "scroll",
            "--pages",
            "3",
            "--orientation",
            "portrait",
            "--tag",
            "cat",
        ]);

        let Some(Command::Images(images)) = args.command else {
            panic!("wrong command parsed");
        };
        match images.command {
            ImagesCommand::Scroll { listing, pages } => {
                assert_eq!(pages, 3);
                assert_eq!(listing.orientation, Some(Orientation::Portrait));
                assert_eq!(listing.tag.as_deref(), Some("cat"));
                assert_eq!(listing.limit, None);
            }
            other => panic!("wrong images command parsed: {other:?}"),
        }
    }
}
