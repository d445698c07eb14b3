use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use bookline_core::domain::resource::ResourceId;
use bookline_core::domain::schedule::{
    weekday_from_index, weekday_index, ScheduleId, ScheduleRule, ScheduleWindow,
};

use super::{
    format_date, format_time, parse_date, parse_time, parse_timestamp, parse_u32,
    RepositoryError, ScheduleRepository,
};
use crate::DbPool;

pub struct SqlScheduleRepository {
    pool: DbPool,
}

impl SqlScheduleRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ScheduleRepository for SqlScheduleRepository {
    async fn list_for_resource(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Vec<ScheduleWindow>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                resource_id,
                weekday,
                override_date,
                start_time,
                end_time,
                slot_minutes,
                available,
                created_at
             FROM resource_schedule
             WHERE resource_id = ?
             ORDER BY weekday ASC, override_date ASC, start_time ASC",
        )
        .bind(&resource_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(window_from_row).collect()
    }

    async fn save(&self, window: ScheduleWindow) -> Result<(), RepositoryError> {
        let (weekday, override_date) = match window.rule {
            ScheduleRule::Weekly(day) => (Some(i64::from(weekday_index(day))), None),
            ScheduleRule::Date(date) => (None, Some(format_date(date))),
        };

        sqlx::query(
            "INSERT INTO resource_schedule (
                id,
                resource_id,
                weekday,
                override_date,
                start_time,
                end_time,
                slot_minutes,
                available,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                resource_id = excluded.resource_id,
                weekday = excluded.weekday,
                override_date = excluded.override_date,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                slot_minutes = excluded.slot_minutes,
                available = excluded.available",
        )
        .bind(&window.id.0)
        .bind(&window.resource_id.0)
        .bind(weekday)
        .bind(override_date)
        .bind(format_time(window.start_time))
        .bind(format_time(window.end_time))
        .bind(i64::from(window.slot_minutes))
        .bind(window.available)
        .bind(window.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: &ScheduleId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM resource_schedule WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn window_from_row(row: SqliteRow) -> Result<ScheduleWindow, RepositoryError> {
    let weekday = row.try_get::<Option<i64>, _>("weekday")?;
    let override_date = row.try_get::<Option<String>, _>("override_date")?;

    let rule = match (weekday, override_date) {
        (Some(index), _) => {
            let index = u8::try_from(index).ok().and_then(weekday_from_index).ok_or_else(
                || RepositoryError::Decode(format!("invalid weekday index `{index}`")),
            )?;
            ScheduleRule::Weekly(index)
        }
        (None, Some(date)) => ScheduleRule::Date(parse_date("override_date", date)?),
        (None, None) => {
            return Err(RepositoryError::Decode(
                "schedule row carries neither weekday nor override_date".to_string(),
            ))
        }
    };

    Ok(ScheduleWindow {
        id: ScheduleId(row.try_get("id")?),
        resource_id: ResourceId(row.try_get("resource_id")?),
        rule,
        start_time: parse_time("start_time", row.try_get("start_time")?)?,
        end_time: parse_time("end_time", row.try_get("end_time")?)?,
        slot_minutes: parse_u32("slot_minutes", row.try_get("slot_minutes")?)?,
        available: row.try_get("available")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
