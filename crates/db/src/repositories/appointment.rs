use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite};

use bookline_core::domain::appointment::{
    Appointment, AppointmentId, AppointmentStatus, BotId, OrgId, SlotChange, SlotScope,
};
use bookline_core::domain::resource::ResourceId;

use super::{
    format_date, format_time, parse_date, parse_optional_timestamp, parse_time, parse_timestamp,
    AppointmentRepository, CapacityOutcome, RepositoryError,
};
use crate::DbPool;

const APPOINTMENT_COLUMNS: &str = "id,
    org_id,
    bot_id,
    resource_id,
    resource_name,
    customer_name,
    customer_email,
    customer_phone,
    booking_date,
    start_time,
    end_time,
    form_data_json,
    notes,
    status,
    calendar_event_id,
    created_at,
    confirmed_at,
    cancelled_at,
    updated_at";

pub struct SqlAppointmentRepository {
    pool: DbPool,
}

impl SqlAppointmentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AppointmentRepository for SqlAppointmentRepository {
    async fn find_by_id(
        &self,
        id: &AppointmentId,
    ) -> Result<Option<Appointment>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointment WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(appointment_from_row).transpose()
    }

    async fn list_active_for_date(
        &self,
        scope: &SlotScope,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let rows = match scope {
            SlotScope::Resource(resource_id) => {
                sqlx::query(&format!(
                    "SELECT {APPOINTMENT_COLUMNS}
                     FROM appointment
                     WHERE resource_id = ?
                       AND booking_date = ?
                       AND status NOT IN ('cancelled', 'rejected')
                     ORDER BY start_time ASC"
                ))
                .bind(&resource_id.0)
                .bind(format_date(date))
                .fetch_all(&self.pool)
                .await?
            }
            SlotScope::Bot(bot_id) => {
                sqlx::query(&format!(
                    "SELECT {APPOINTMENT_COLUMNS}
                     FROM appointment
                     WHERE bot_id = ?
                       AND resource_id IS NULL
                       AND booking_date = ?
                       AND status NOT IN ('cancelled', 'rejected')
                     ORDER BY start_time ASC"
                ))
                .bind(&bot_id.0)
                .bind(format_date(date))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(appointment_from_row).collect()
    }

    async fn list_for_bot(
        &self,
        bot_id: &BotId,
        status: Option<AppointmentStatus>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let mut sql = format!("SELECT {APPOINTMENT_COLUMNS} FROM appointment WHERE bot_id = ?");
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if date.is_some() {
            sql.push_str(" AND booking_date = ?");
        }
        sql.push_str(" ORDER BY booking_date ASC, start_time ASC");

        let mut query = sqlx::query(&sql).bind(&bot_id.0);
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        if let Some(date) = date {
            query = query.bind(format_date(date));
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(appointment_from_row).collect()
    }

    async fn find_confirmed_for_customer(
        &self,
        bot_id: &BotId,
        customer_email: &str,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> Result<Option<Appointment>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {APPOINTMENT_COLUMNS}
             FROM appointment
             WHERE bot_id = ?
               AND customer_email = ?
               AND booking_date = ?
               AND start_time = ?
               AND status = 'confirmed'"
        ))
        .bind(&bot_id.0)
        .bind(customer_email)
        .bind(format_date(date))
        .bind(format_time(start_time))
        .fetch_optional(&self.pool)
        .await?;

        row.map(appointment_from_row).transpose()
    }

    async fn insert_within_capacity(
        &self,
        appointment: &Appointment,
        scope: &SlotScope,
        capacity: u32,
    ) -> Result<CapacityOutcome, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        begin_immediate(&mut conn).await?;

        let result = insert_if_free(&mut conn, appointment, scope, capacity, None).await;
        finish(&mut conn, result).await
    }

    async fn reschedule_within_capacity(
        &self,
        id: &AppointmentId,
        change: &SlotChange,
        scope: &SlotScope,
        capacity: u32,
        updated_at: DateTime<Utc>,
    ) -> Result<CapacityOutcome, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        begin_immediate(&mut conn).await?;

        let result = async {
            let occupied = count_overlapping(
                &mut conn,
                scope,
                change.date,
                change.start_time,
                change.end_time,
                Some(id),
            )
            .await?;
            if occupied >= capacity {
                return Ok(CapacityOutcome::Exhausted);
            }

            sqlx::query(
                "UPDATE appointment SET
                    resource_id = ?,
                    resource_name = ?,
                    booking_date = ?,
                    start_time = ?,
                    end_time = ?,
                    form_data_json = COALESCE(?, form_data_json),
                    updated_at = ?
                 WHERE id = ?",
            )
            .bind(change.resource_id.as_ref().map(|value| value.0.as_str()))
            .bind(change.resource_name.as_deref())
            .bind(format_date(change.date))
            .bind(format_time(change.start_time))
            .bind(format_time(change.end_time))
            .bind(
                change
                    .form_data
                    .as_ref()
                    .map(|value| value.to_string()),
            )
            .bind(updated_at.to_rfc3339())
            .bind(&id.0)
            .execute(&mut *conn)
            .await?;

            Ok(CapacityOutcome::Granted)
        }
        .await;

        finish(&mut conn, result).await
    }

    async fn update_status(
        &self,
        id: &AppointmentId,
        status: AppointmentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let stamp = now.to_rfc3339();
        let confirmed_at =
            matches!(status, AppointmentStatus::Confirmed).then(|| stamp.clone());
        let cancelled_at = matches!(
            status,
            AppointmentStatus::Cancelled | AppointmentStatus::Rejected
        )
        .then(|| stamp.clone());

        sqlx::query(
            "UPDATE appointment SET
                status = ?,
                confirmed_at = COALESCE(?, confirmed_at),
                cancelled_at = COALESCE(?, cancelled_at),
                updated_at = ?
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(confirmed_at)
        .bind(cancelled_at)
        .bind(stamp)
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_calendar_event(
        &self,
        id: &AppointmentId,
        calendar_event_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE appointment SET calendar_event_id = ?, updated_at = ? WHERE id = ?")
            .bind(calendar_event_id)
            .bind(now.to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn complete_past_due(
        &self,
        bot_id: &BotId,
        cutoff_date: NaiveDate,
        cutoff_time: NaiveTime,
        now: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "UPDATE appointment SET status = 'completed', updated_at = ?
             WHERE bot_id = ?
               AND status = 'confirmed'
               AND (booking_date < ? OR (booking_date = ? AND end_time <= ?))",
        )
        .bind(now.to_rfc3339())
        .bind(&bot_id.0)
        .bind(format_date(cutoff_date))
        .bind(format_date(cutoff_date))
        .bind(format_time(cutoff_time))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// SQLite's default deferred transaction only takes the write lock at the
/// first write, after the overlap count has already been read. An immediate
/// transaction takes it up front so two concurrent bookings cannot both see
/// a free slot.
async fn begin_immediate(conn: &mut PoolConnection<Sqlite>) -> Result<(), RepositoryError> {
    sqlx::query("BEGIN IMMEDIATE").execute(&mut **conn).await?;
    Ok(())
}

async fn finish(
    conn: &mut PoolConnection<Sqlite>,
    result: Result<CapacityOutcome, RepositoryError>,
) -> Result<CapacityOutcome, RepositoryError> {
    match result {
        Ok(outcome) => {
            sqlx::query("COMMIT").execute(&mut **conn).await?;
            Ok(outcome)
        }
        Err(error) => {
            let _ = sqlx::query("ROLLBACK").execute(&mut **conn).await;
            Err(error)
        }
    }
}

async fn insert_if_free(
    conn: &mut PoolConnection<Sqlite>,
    appointment: &Appointment,
    scope: &SlotScope,
    capacity: u32,
    exclude: Option<&AppointmentId>,
) -> Result<CapacityOutcome, RepositoryError> {
    let occupied = count_overlapping(
        conn,
        scope,
        appointment.date,
        appointment.start_time,
        appointment.end_time,
        exclude,
    )
    .await?;
    if occupied >= capacity {
        return Ok(CapacityOutcome::Exhausted);
    }

    sqlx::query(
        "INSERT INTO appointment (
            id,
            org_id,
            bot_id,
            resource_id,
            resource_name,
            customer_name,
            customer_email,
            customer_phone,
            booking_date,
            start_time,
            end_time,
            form_data_json,
            notes,
            status,
            calendar_event_id,
            created_at,
            confirmed_at,
            cancelled_at,
            updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&appointment.id.0)
    .bind(&appointment.org_id.0)
    .bind(&appointment.bot_id.0)
    .bind(appointment.resource_id.as_ref().map(|value| value.0.as_str()))
    .bind(appointment.resource_name.as_deref())
    .bind(&appointment.customer_name)
    .bind(&appointment.customer_email)
    .bind(appointment.customer_phone.as_deref())
    .bind(format_date(appointment.date))
    .bind(format_time(appointment.start_time))
    .bind(format_time(appointment.end_time))
    .bind(appointment.form_data.to_string())
    .bind(appointment.notes.as_deref())
    .bind(appointment.status.as_str())
    .bind(appointment.calendar_event_id.as_deref())
    .bind(appointment.created_at.to_rfc3339())
    .bind(appointment.confirmed_at.map(|value| value.to_rfc3339()))
    .bind(appointment.cancelled_at.map(|value| value.to_rfc3339()))
    .bind(appointment.updated_at.to_rfc3339())
    .execute(&mut **conn)
    .await?;

    Ok(CapacityOutcome::Granted)
}

/// Overlap count for one slot. The three clauses cover an existing row that
/// spans the slot start, one that spans the slot end, and one contained in
/// the slot; together they match the half-open interval predicate in
/// `bookline_core::conflict`.
async fn count_overlapping(
    conn: &mut PoolConnection<Sqlite>,
    scope: &SlotScope,
    date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    exclude: Option<&AppointmentId>,
) -> Result<u32, RepositoryError> {
    let scope_clause = match scope {
        SlotScope::Resource(_) => "resource_id = ?",
        SlotScope::Bot(_) => "bot_id = ? AND resource_id IS NULL",
    };
    let exclude_clause = if exclude.is_some() { " AND id != ?" } else { "" };
    let sql = format!(
        "SELECT COUNT(*) AS occupied
         FROM appointment
         WHERE {scope_clause}
           AND booking_date = ?
           AND status NOT IN ('cancelled', 'rejected')
           AND (
                (start_time <= ? AND end_time > ?)
             OR (start_time < ? AND end_time >= ?)
             OR (start_time >= ? AND end_time <= ?)
           ){exclude_clause}"
    );

    let scope_value = match scope {
        SlotScope::Resource(resource_id) => resource_id.0.as_str(),
        SlotScope::Bot(bot_id) => bot_id.0.as_str(),
    };
    let start = format_time(start_time);
    let end = format_time(end_time);

    let mut query = sqlx::query(&sql)
        .bind(scope_value)
        .bind(format_date(date))
        .bind(&start)
        .bind(&start)
        .bind(&end)
        .bind(&end)
        .bind(&start)
        .bind(&end);
    if let Some(id) = exclude {
        query = query.bind(&id.0);
    }

    let row = query.fetch_one(&mut **conn).await?;
    let occupied: i64 = row.try_get("occupied")?;
    Ok(occupied.max(0) as u32)
}

fn appointment_from_row(row: SqliteRow) -> Result<Appointment, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = AppointmentStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown appointment status `{status_raw}`"))
    })?;

    let form_data_raw = row.try_get::<String, _>("form_data_json")?;
    let form_data = serde_json::from_str(&form_data_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid json in `form_data_json`: {error}"))
    })?;

    Ok(Appointment {
        id: AppointmentId(row.try_get("id")?),
        org_id: OrgId(row.try_get("org_id")?),
        bot_id: BotId(row.try_get("bot_id")?),
        resource_id: row.try_get::<Option<String>, _>("resource_id")?.map(ResourceId),
        resource_name: row.try_get("resource_name")?,
        customer_name: row.try_get("customer_name")?,
        customer_email: row.try_get("customer_email")?,
        customer_phone: row.try_get("customer_phone")?,
        date: parse_date("booking_date", row.try_get("booking_date")?)?,
        start_time: parse_time("start_time", row.try_get("start_time")?)?,
        end_time: parse_time("end_time", row.try_get("end_time")?)?,
        form_data,
        notes: row.try_get("notes")?,
        status,
        calendar_event_id: row.try_get("calendar_event_id")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        confirmed_at: parse_optional_timestamp("confirmed_at", row.try_get("confirmed_at")?)?,
        cancelled_at: parse_optional_timestamp("cancelled_at", row.try_get("cancelled_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
