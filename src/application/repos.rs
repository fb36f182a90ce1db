//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::{SeckillVoucher, Shop, ShopType, ValidShopUpdate, VoucherOrder};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[async_trait]
pub trait ShopsRepo: Send + Sync {
    async fn find_shop(&self, id: i64) -> Result<Option<Shop>, RepoError>;

    async fn begin_shop_update(&self) -> Result<Box<dyn ShopTransaction>, RepoError>;

    /// Ids in ascending order, used to pre-warm the cache.
    async fn list_shop_ids(&self, limit: u32) -> Result<Vec<i64>, RepoError>;
}

/// Shop write unit of work. Dropping it without `commit` rolls back.
#[async_trait]
pub trait ShopTransaction: Send {
    /// Overwrite the editable columns and return the row as written.
    /// `RepoError::NotFound` when no row matched.
    async fn update_shop(&mut self, update: &ValidShopUpdate) -> Result<Shop, RepoError>;

    async fn commit(self: Box<Self>) -> Result<(), RepoError>;
}

#[async_trait]
pub trait ShopTypesRepo: Send + Sync {
    /// All shop types ordered by `sort` ascending.
    async fn list_shop_types(&self) -> Result<Vec<ShopType>, RepoError>;
}

#[async_trait]
pub trait VouchersRepo: Send + Sync {
    async fn find_seckill_voucher(
        &self,
        voucher_id: i64,
    ) -> Result<Option<SeckillVoucher>, RepoError>;

    async fn begin_order(&self) -> Result<Box<dyn OrderTransaction>, RepoError>;
}

/// One order-creation unit of work. Dropping it without `commit` rolls back.
#[async_trait]
pub trait OrderTransaction: Send {
    async fn has_order(&mut self, user_id: i64, voucher_id: i64) -> Result<bool, RepoError>;

    /// Conditional `stock = stock - 1 WHERE stock > 0`. `false` when nothing was left.
    async fn decrement_stock(&mut self, voucher_id: i64) -> Result<bool, RepoError>;

    /// `RepoError::Duplicate` when the user already holds an order for the voucher.
    async fn insert_order(&mut self, order: &VoucherOrder) -> Result<(), RepoError>;

    async fn commit(self: Box<Self>) -> Result<(), RepoError>;
}
