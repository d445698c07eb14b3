use chrono_tz::Tz;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use bookline_core::domain::appointment::{BotId, OrgId};
use bookline_core::domain::policy::{BookingPolicy, PolicyWindow};

use super::{parse_timestamp, parse_u32, PolicyRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPolicyRepository {
    pool: DbPool,
}

impl SqlPolicyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PolicyRepository for SqlPolicyRepository {
    async fn find_for_bot(&self, bot_id: &BotId) -> Result<Option<BookingPolicy>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                bot_id,
                org_id,
                timezone,
                slot_minutes,
                capacity_per_slot,
                min_notice_minutes,
                max_future_days,
                windows_json,
                required_fields_json,
                created_at,
                updated_at
             FROM booking_policy
             WHERE bot_id = ?",
        )
        .bind(&bot_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(policy_from_row).transpose()
    }

    async fn save(&self, policy: BookingPolicy) -> Result<(), RepositoryError> {
        let windows_json = serde_json::to_string(&policy.windows).map_err(|error| {
            RepositoryError::Decode(format!("could not encode policy windows: {error}"))
        })?;
        let required_fields_json =
            serde_json::to_string(&policy.required_fields).map_err(|error| {
                RepositoryError::Decode(format!("could not encode required fields: {error}"))
            })?;

        sqlx::query(
            "INSERT INTO booking_policy (
                bot_id,
                org_id,
                timezone,
                slot_minutes,
                capacity_per_slot,
                min_notice_minutes,
                max_future_days,
                windows_json,
                required_fields_json,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(bot_id) DO UPDATE SET
                org_id = excluded.org_id,
                timezone = excluded.timezone,
                slot_minutes = excluded.slot_minutes,
                capacity_per_slot = excluded.capacity_per_slot,
                min_notice_minutes = excluded.min_notice_minutes,
                max_future_days = excluded.max_future_days,
                windows_json = excluded.windows_json,
                required_fields_json = excluded.required_fields_json,
                updated_at = excluded.updated_at",
        )
        .bind(&policy.bot_id.0)
        .bind(&policy.org_id.0)
        .bind(policy.timezone.name())
        .bind(i64::from(policy.slot_minutes))
        .bind(i64::from(policy.capacity_per_slot))
        .bind(i64::from(policy.min_notice_minutes))
        .bind(policy.max_future_days.map(i64::from))
        .bind(windows_json)
        .bind(required_fields_json)
        .bind(policy.created_at.to_rfc3339())
        .bind(policy.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<BookingPolicy>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                bot_id,
                org_id,
                timezone,
                slot_minutes,
                capacity_per_slot,
                min_notice_minutes,
                max_future_days,
                windows_json,
                required_fields_json,
                created_at,
                updated_at
             FROM booking_policy
             ORDER BY bot_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(policy_from_row).collect()
    }
}

fn policy_from_row(row: SqliteRow) -> Result<BookingPolicy, RepositoryError> {
    let timezone_raw = row.try_get::<String, _>("timezone")?;
    let timezone = timezone_raw.parse::<Tz>().map_err(|_| {
        RepositoryError::Decode(format!("unknown IANA timezone `{timezone_raw}`"))
    })?;

    let windows_raw = row.try_get::<String, _>("windows_json")?;
    let windows: Vec<PolicyWindow> = serde_json::from_str(&windows_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid json in `windows_json`: {error}"))
    })?;

    let required_fields_raw = row.try_get::<String, _>("required_fields_json")?;
    let required_fields: Vec<String> =
        serde_json::from_str(&required_fields_raw).map_err(|error| {
            RepositoryError::Decode(format!("invalid json in `required_fields_json`: {error}"))
        })?;

    Ok(BookingPolicy {
        org_id: OrgId(row.try_get("org_id")?),
        bot_id: BotId(row.try_get("bot_id")?),
        timezone,
        slot_minutes: parse_u32("slot_minutes", row.try_get("slot_minutes")?)?,
        capacity_per_slot: parse_u32("capacity_per_slot", row.try_get("capacity_per_slot")?)?,
        min_notice_minutes: parse_u32("min_notice_minutes", row.try_get("min_notice_minutes")?)?,
        max_future_days: row
            .try_get::<Option<i64>, _>("max_future_days")?
            .map(|value| parse_u32("max_future_days", value))
            .transpose()?,
        windows,
        required_fields,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveTime, Utc, Weekday};
    use chrono_tz::Tz;

    use bookline_core::domain::appointment::{BotId, OrgId};
    use bookline_core::domain::policy::{BookingPolicy, PolicyWindow};

    use super::SqlPolicyRepository;
    use crate::migrations;
    use crate::repositories::PolicyRepository;
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn policy_round_trips_with_windows_and_timezone() {
        let pool = setup_pool().await;
        let repo = SqlPolicyRepository::new(pool.clone());

        let policy = sample_policy("bot-1");
        repo.save(policy.clone()).await.expect("save policy");

        let found = repo.find_for_bot(&policy.bot_id).await.expect("find policy");
        assert_eq!(found, Some(policy));

        pool.close().await;
    }

    #[tokio::test]
    async fn save_is_an_upsert() {
        let pool = setup_pool().await;
        let repo = SqlPolicyRepository::new(pool.clone());

        let mut policy = sample_policy("bot-1");
        repo.save(policy.clone()).await.expect("save policy");

        policy.capacity_per_slot = 4;
        policy.max_future_days = None;
        policy.updated_at = ts("2025-01-05T00:00:00Z");
        repo.save(policy.clone()).await.expect("update policy");

        let found = repo.find_for_bot(&policy.bot_id).await.expect("find policy");
        assert_eq!(found, Some(policy));

        pool.close().await;
    }

    #[tokio::test]
    async fn list_all_returns_every_bot_policy() {
        let pool = setup_pool().await;
        let repo = SqlPolicyRepository::new(pool.clone());

        repo.save(sample_policy("bot-b")).await.expect("save b");
        repo.save(sample_policy("bot-a")).await.expect("save a");

        let listed = repo.list_all().await.expect("list policies");
        let bots: Vec<&str> = listed.iter().map(|policy| policy.bot_id.0.as_str()).collect();
        assert_eq!(bots, vec!["bot-a", "bot-b"]);

        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    fn sample_policy(bot_id: &str) -> BookingPolicy {
        let mut policy =
            BookingPolicy::defaults(OrgId("org-1".to_string()), BotId(bot_id.to_string()));
        policy.timezone = "America/New_York".parse::<Tz>().unwrap();
        policy.windows = vec![PolicyWindow {
            weekday: Weekday::Mon,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        }];
        policy.required_fields = vec!["reason".to_string()];
        policy.created_at = ts("2025-01-02T00:00:00Z");
        policy.updated_at = ts("2025-01-02T00:00:00Z");
        policy
    }
}
