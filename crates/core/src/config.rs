use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub calendar: CalendarConfig,
    pub sweeper: SweeperConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

/// Google Calendar mirroring. Disabled by default; when disabled the service
/// runs with a no-op sync and bookings never carry external event ids.
#[derive(Clone, Debug)]
pub struct CalendarConfig {
    pub enabled: bool,
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<SecretString>,
    pub google_refresh_token: Option<SecretString>,
    pub google_calendar_id: String,
    pub google_token_uri: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub calendar_enabled: Option<bool>,
    pub sweeper_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://bookline.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8000,
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            calendar: CalendarConfig {
                enabled: false,
                google_client_id: None,
                google_client_secret: None,
                google_refresh_token: None,
                google_calendar_id: "primary".to_string(),
                google_token_uri: "https://oauth2.googleapis.com/token".to_string(),
                timeout_secs: 10,
                max_retries: 3,
            },
            sweeper: SweeperConfig { enabled: true, interval_secs: 60 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("bookline.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(calendar) = patch.calendar {
            if let Some(enabled) = calendar.enabled {
                self.calendar.enabled = enabled;
            }
            if let Some(client_id) = calendar.google_client_id {
                self.calendar.google_client_id = Some(client_id);
            }
            if let Some(client_secret) = calendar.google_client_secret {
                self.calendar.google_client_secret = Some(secret_value(client_secret));
            }
            if let Some(refresh_token) = calendar.google_refresh_token {
                self.calendar.google_refresh_token = Some(secret_value(refresh_token));
            }
            if let Some(calendar_id) = calendar.google_calendar_id {
                self.calendar.google_calendar_id = calendar_id;
            }
            if let Some(token_uri) = calendar.google_token_uri {
                self.calendar.google_token_uri = token_uri;
            }
            if let Some(timeout_secs) = calendar.timeout_secs {
                self.calendar.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = calendar.max_retries {
                self.calendar.max_retries = max_retries;
            }
        }

        if let Some(sweeper) = patch.sweeper {
            if let Some(enabled) = sweeper.enabled {
                self.sweeper.enabled = enabled;
            }
            if let Some(interval_secs) = sweeper.interval_secs {
                self.sweeper.interval_secs = interval_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("BOOKLINE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("BOOKLINE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("BOOKLINE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("BOOKLINE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("BOOKLINE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("BOOKLINE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("BOOKLINE_SERVER_PORT") {
            self.server.port = parse_u16("BOOKLINE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("BOOKLINE_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("BOOKLINE_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("BOOKLINE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("BOOKLINE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("BOOKLINE_CALENDAR_ENABLED") {
            self.calendar.enabled = parse_bool("BOOKLINE_CALENDAR_ENABLED", &value)?;
        }
        if let Some(value) = read_env("BOOKLINE_GOOGLE_CLIENT_ID") {
            self.calendar.google_client_id = Some(value);
        }
        if let Some(value) = read_env("BOOKLINE_GOOGLE_CLIENT_SECRET") {
            self.calendar.google_client_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("BOOKLINE_GOOGLE_REFRESH_TOKEN") {
            self.calendar.google_refresh_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("BOOKLINE_GOOGLE_CALENDAR_ID") {
            self.calendar.google_calendar_id = value;
        }
        if let Some(value) = read_env("BOOKLINE_GOOGLE_TOKEN_URI") {
            self.calendar.google_token_uri = value;
        }
        if let Some(value) = read_env("BOOKLINE_CALENDAR_TIMEOUT_SECS") {
            self.calendar.timeout_secs = parse_u64("BOOKLINE_CALENDAR_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("BOOKLINE_CALENDAR_MAX_RETRIES") {
            self.calendar.max_retries = parse_u32("BOOKLINE_CALENDAR_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("BOOKLINE_SWEEPER_ENABLED") {
            self.sweeper.enabled = parse_bool("BOOKLINE_SWEEPER_ENABLED", &value)?;
        }
        if let Some(value) = read_env("BOOKLINE_SWEEPER_INTERVAL_SECS") {
            self.sweeper.interval_secs = parse_u64("BOOKLINE_SWEEPER_INTERVAL_SECS", &value)?;
        }

        let log_level =
            read_env("BOOKLINE_LOGGING_LEVEL").or_else(|| read_env("BOOKLINE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("BOOKLINE_LOGGING_FORMAT").or_else(|| read_env("BOOKLINE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(calendar_enabled) = overrides.calendar_enabled {
            self.calendar.enabled = calendar_enabled;
        }
        if let Some(sweeper_enabled) = overrides.sweeper_enabled {
            self.sweeper.enabled = sweeper_enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_calendar(&self.calendar)?;
        validate_sweeper(&self.sweeper)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("bookline.toml"), PathBuf::from("config/bookline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// `${VAR}` references inside the TOML file are replaced with the value of
/// the named environment variable before parsing.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.port == server.health_check_port {
        return Err(ConfigError::Validation(
            "server.port and server.health_check_port must differ".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_calendar(calendar: &CalendarConfig) -> Result<(), ConfigError> {
    if calendar.enabled {
        let client_id_missing = calendar
            .google_client_id
            .as_ref()
            .map(|value| value.trim().is_empty())
            .unwrap_or(true);
        if client_id_missing {
            return Err(ConfigError::Validation(
                "calendar.google_client_id is required when calendar.enabled is true".to_string(),
            ));
        }

        let client_secret_missing = calendar
            .google_client_secret
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if client_secret_missing {
            return Err(ConfigError::Validation(
                "calendar.google_client_secret is required when calendar.enabled is true"
                    .to_string(),
            ));
        }

        let refresh_token_missing = calendar
            .google_refresh_token
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if refresh_token_missing {
            return Err(ConfigError::Validation(
                "calendar.google_refresh_token is required when calendar.enabled is true"
                    .to_string(),
            ));
        }
    }

    if !calendar.google_token_uri.starts_with("http://")
        && !calendar.google_token_uri.starts_with("https://")
    {
        return Err(ConfigError::Validation(
            "calendar.google_token_uri must be an http(s) URL".to_string(),
        ));
    }

    if calendar.timeout_secs == 0 || calendar.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "calendar.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_sweeper(sweeper: &SweeperConfig) -> Result<(), ConfigError> {
    if sweeper.enabled && sweeper.interval_secs == 0 {
        return Err(ConfigError::Validation(
            "sweeper.interval_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    calendar: Option<CalendarPatch>,
    sweeper: Option<SweeperPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CalendarPatch {
    enabled: Option<bool>,
    google_client_id: Option<String>,
    google_client_secret: Option<String>,
    google_refresh_token: Option<String>,
    google_calendar_id: Option<String>,
    google_token_uri: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SweeperPatch {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
