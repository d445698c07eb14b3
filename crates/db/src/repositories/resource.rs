use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use bookline_core::domain::appointment::{BotId, OrgId};
use bookline_core::domain::resource::{Resource, ResourceId, ResourceType};

use super::{parse_timestamp, parse_u32, RepositoryError, ResourceRepository};
use crate::DbPool;

pub struct SqlResourceRepository {
    pool: DbPool,
}

impl SqlResourceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ResourceRepository for SqlResourceRepository {
    async fn find_by_id(&self, id: &ResourceId) -> Result<Option<Resource>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                org_id,
                bot_id,
                name,
                resource_type,
                capacity_per_slot,
                active,
                created_at,
                updated_at
             FROM booking_resource
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(resource_from_row).transpose()
    }

    async fn list_for_bot(
        &self,
        bot_id: &BotId,
        only_active: bool,
    ) -> Result<Vec<Resource>, RepositoryError> {
        let rows = if only_active {
            sqlx::query(
                "SELECT
                    id,
                    org_id,
                    bot_id,
                    name,
                    resource_type,
                    capacity_per_slot,
                    active,
                    created_at,
                    updated_at
                 FROM booking_resource
                 WHERE bot_id = ? AND active = 1
                 ORDER BY name ASC",
            )
            .bind(&bot_id.0)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT
                    id,
                    org_id,
                    bot_id,
                    name,
                    resource_type,
                    capacity_per_slot,
                    active,
                    created_at,
                    updated_at
                 FROM booking_resource
                 WHERE bot_id = ?
                 ORDER BY name ASC",
            )
            .bind(&bot_id.0)
            .fetch_all(&self.pool)
            .await?
        };

        rows.into_iter().map(resource_from_row).collect()
    }

    async fn save(&self, resource: Resource) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO booking_resource (
                id,
                org_id,
                bot_id,
                name,
                resource_type,
                capacity_per_slot,
                active,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                org_id = excluded.org_id,
                bot_id = excluded.bot_id,
                name = excluded.name,
                resource_type = excluded.resource_type,
                capacity_per_slot = excluded.capacity_per_slot,
                active = excluded.active,
                updated_at = excluded.updated_at",
        )
        .bind(&resource.id.0)
        .bind(&resource.org_id.0)
        .bind(&resource.bot_id.0)
        .bind(&resource.name)
        .bind(resource.resource_type.as_str())
        .bind(i64::from(resource.capacity_per_slot))
        .bind(resource.active)
        .bind(resource.created_at.to_rfc3339())
        .bind(resource.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn resource_from_row(row: SqliteRow) -> Result<Resource, RepositoryError> {
    let type_raw = row.try_get::<String, _>("resource_type")?;
    let resource_type = ResourceType::parse(&type_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown resource type `{type_raw}`"))
    })?;

    Ok(Resource {
        id: ResourceId(row.try_get("id")?),
        org_id: OrgId(row.try_get("org_id")?),
        bot_id: BotId(row.try_get("bot_id")?),
        name: row.try_get("name")?,
        resource_type,
        capacity_per_slot: parse_u32("capacity_per_slot", row.try_get("capacity_per_slot")?)?,
        active: row.try_get("active")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
