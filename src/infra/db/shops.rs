use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;

use crate::{
    application::repos::{RepoError, ShopTransaction, ShopsRepo},
    domain::entities::{Shop, ValidShopUpdate},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct ShopRow {
    id: i64,
    name: String,
    type_id: i64,
    images: String,
    area: Option<String>,
    address: String,
    x: f64,
    y: f64,
    avg_price: Option<i64>,
    sold: i32,
    comments: i32,
    score: i32,
    open_hours: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<ShopRow> for Shop {
    fn from(row: ShopRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            type_id: row.type_id,
            images: row.images,
            area: row.area,
            address: row.address,
            x: row.x,
            y: row.y,
            avg_price: row.avg_price,
            sold: row.sold,
            comments: row.comments,
            score: row.score,
            open_hours: row.open_hours,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl ShopsRepo for PostgresRepositories {
    async fn find_shop(&self, id: i64) -> Result<Option<Shop>, RepoError> {
        let row = sqlx::query_as::<_, ShopRow>(
            r#"
            SELECT id, name, type_id, images, area, address, x, y, avg_price,
                   sold, comments, score, open_hours, created_at, updated_at
            FROM tb_shop
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Shop::from))
    }

    async fn begin_shop_update(&self) -> Result<Box<dyn ShopTransaction>, RepoError> {
        let tx = self.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(PgShopTransaction { tx }))
    }

    async fn list_shop_ids(&self, limit: u32) -> Result<Vec<i64>, RepoError> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM tb_shop ORDER BY id LIMIT $1")
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)
    }
}

struct PgShopTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ShopTransaction for PgShopTransaction {
    async fn update_shop(&mut self, update: &ValidShopUpdate) -> Result<Shop, RepoError> {
        let row = sqlx::query_as::<_, ShopRow>(
            r#"
            UPDATE tb_shop
            SET name = $2,
                type_id = $3,
                images = $4,
                area = $5,
                address = $6,
                x = $7,
                y = $8,
                avg_price = $9,
                open_hours = $10,
                updated_at = now()
            WHERE id = $1
            RETURNING id, name, type_id, images, area, address, x, y, avg_price,
                      sold, comments, score, open_hours, created_at, updated_at
            "#,
        )
        .bind(update.id)
        .bind(&update.name)
        .bind(update.type_id)
        .bind(&update.images)
        .bind(&update.area)
        .bind(&update.address)
        .bind(update.x)
        .bind(update.y)
        .bind(update.avg_price)
        .bind(&update.open_hours)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        row.map(Shop::from).ok_or(RepoError::NotFound)
    }

    async fn commit(self: Box<Self>) -> Result<(), RepoError> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }
}
