use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;

use crate::{
    application::repos::{OrderTransaction, RepoError, VouchersRepo},
    domain::entities::{SeckillVoucher, VoucherOrder},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct SeckillVoucherRow {
    voucher_id: i64,
    stock: i32,
    begin_time: OffsetDateTime,
    end_time: OffsetDateTime,
}

impl From<SeckillVoucherRow> for SeckillVoucher {
    fn from(row: SeckillVoucherRow) -> Self {
        Self {
            voucher_id: row.voucher_id,
            stock: row.stock,
            begin_time: row.begin_time,
            end_time: row.end_time,
        }
    }
}

#[async_trait]
impl VouchersRepo for PostgresRepositories {
    async fn find_seckill_voucher(
        &self,
        voucher_id: i64,
    ) -> Result<Option<SeckillVoucher>, RepoError> {
        let row = sqlx::query_as::<_, SeckillVoucherRow>(
            r#"
            SELECT voucher_id, stock, begin_time, end_time
            FROM tb_seckill_voucher
            WHERE voucher_id = $1
            "#,
        )
        .bind(voucher_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(SeckillVoucher::from))
    }

    async fn begin_order(&self) -> Result<Box<dyn OrderTransaction>, RepoError> {
        let tx = self.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(PgOrderTransaction { tx }))
    }
}

/// Order unit of work on one pooled connection; rolled back on drop.
struct PgOrderTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl OrderTransaction for PgOrderTransaction {
    async fn has_order(&mut self, user_id: i64, voucher_id: i64) -> Result<bool, RepoError> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM tb_voucher_order WHERE user_id = $1 AND voucher_id = $2
            )
            "#,
        )
        .bind(user_id)
        .bind(voucher_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)
    }

    async fn decrement_stock(&mut self, voucher_id: i64) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE tb_seckill_voucher
            SET stock = stock - 1, updated_at = now()
            WHERE voucher_id = $1 AND stock > 0
            "#,
        )
        .bind(voucher_id)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_order(&mut self, order: &VoucherOrder) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO tb_voucher_order (id, user_id, voucher_id, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.voucher_id)
        .bind(order.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepoError> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }
}
