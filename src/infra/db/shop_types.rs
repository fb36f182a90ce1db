use async_trait::async_trait;

use crate::{
    application::repos::{RepoError, ShopTypesRepo},
    domain::entities::ShopType,
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct ShopTypeRow {
    id: i64,
    name: String,
    icon: String,
    sort: i32,
}

impl From<ShopTypeRow> for ShopType {
    fn from(row: ShopTypeRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            icon: row.icon,
            sort: row.sort,
        }
    }
}

#[async_trait]
impl ShopTypesRepo for PostgresRepositories {
    async fn list_shop_types(&self) -> Result<Vec<ShopType>, RepoError> {
        let rows = sqlx::query_as::<_, ShopTypeRow>(
            "SELECT id, name, icon, sort FROM tb_shop_type ORDER BY sort ASC, id ASC",
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ShopType::from).collect())
    }
}
