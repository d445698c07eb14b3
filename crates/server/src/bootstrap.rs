use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use bookline_booking::{BookingService, CompletionSweeper};
use bookline_calendar::{CalendarSync, CalendarSyncError, GoogleCalendar, NoopCalendar};
use bookline_core::config::{AppConfig, ConfigError, LoadOptions};
use bookline_db::repositories::{
    SqlAppointmentRepository, SqlPolicyRepository, SqlResourceRepository, SqlScheduleRepository,
};
use bookline_db::{connect_with_settings, migrations, DbPool};

use crate::routes::AppState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
    pub sweeper: Option<CompletionSweeper>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("calendar client initialization failed: {0}")]
    Calendar(#[source] CalendarSyncError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let resources = Arc::new(SqlResourceRepository::new(db_pool.clone()));
    let schedules = Arc::new(SqlScheduleRepository::new(db_pool.clone()));
    let policies = Arc::new(SqlPolicyRepository::new(db_pool.clone()));
    let appointments = Arc::new(SqlAppointmentRepository::new(db_pool.clone()));

    let calendar = build_calendar(&config)?;
    let service = Arc::new(BookingService::new(
        resources.clone(),
        schedules.clone(),
        policies.clone(),
        appointments.clone(),
        calendar,
    ));

    let sweeper = config.sweeper.enabled.then(|| {
        CompletionSweeper::new(
            policies.clone(),
            appointments.clone(),
            std::time::Duration::from_secs(config.sweeper.interval_secs.max(1)),
        )
    });

    let state = AppState { service, resources, schedules, policies };

    Ok(Application { config, db_pool, state, sweeper })
}

/// Config validation guarantees credentials are present when mirroring is
/// enabled; the disabled path runs with a no-op sync.
fn build_calendar(config: &AppConfig) -> Result<Arc<dyn CalendarSync>, BootstrapError> {
    if !config.calendar.enabled {
        info!(event_name = "system.bootstrap.calendar_disabled", "calendar mirroring disabled");
        return Ok(Arc::new(NoopCalendar));
    }

    let calendar = &config.calendar;
    match (&calendar.google_client_id, &calendar.google_client_secret, &calendar.google_refresh_token)
    {
        (Some(client_id), Some(client_secret), Some(refresh_token)) => {
            let client = GoogleCalendar::new(
                client_id.clone(),
                client_secret.clone(),
                refresh_token.clone(),
                calendar.google_calendar_id.clone(),
                calendar.google_token_uri.clone(),
                calendar.timeout_secs,
                calendar.max_retries,
            )
            .map_err(BootstrapError::Calendar)?;
            info!(
                event_name = "system.bootstrap.calendar_enabled",
                calendar_id = %calendar.google_calendar_id,
                "google calendar mirroring enabled"
            );
            Ok(Arc::new(client))
        }
        _ => Err(BootstrapError::Config(ConfigError::Validation(
            "calendar.enabled requires google_client_id, google_client_secret and google_refresh_token"
                .to_string(),
        ))),
    }
}
