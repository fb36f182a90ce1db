//! Flash-sale order pipeline.
//!
//! Window and stock are pre-checked without a lock. The user's attempts are
//! then serialized through `lock:order:{user_id}`, and inside that lock one
//! transaction checks for an existing order, conditionally decrements stock
//! and inserts the order. The conditional decrement is the only thing that
//! decides whether inventory is left.

use std::{sync::Arc, time::Duration};

use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::application::context::RequestContext;
use crate::application::repos::{RepoError, VouchersRepo};
use crate::cache::{CacheStoreError, DistributedMutex, IdError, IdGenerator, order_lock_name};
use crate::domain::entities::VoucherOrder;
use crate::domain::seckill::SeckillRejection;

const ORDER_ID_TAG: &str = "order";
const METRIC_SECKILL_ORDER: &str = "flashsale_seckill_order_total";
const METRIC_SECKILL_REJECTED: &str = "flashsale_seckill_rejected_total";

#[derive(Debug, Error)]
pub enum SeckillError {
    #[error(transparent)]
    Rejected(#[from] SeckillRejection),
    #[error("seckill voucher {voucher_id} not found")]
    VoucherNotFound { voucher_id: i64 },
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Lock(#[from] CacheStoreError),
    #[error(transparent)]
    Id(#[from] IdError),
}

impl SeckillError {
    pub fn rejection(&self) -> Option<SeckillRejection> {
        match self {
            Self::Rejected(rejection) => Some(*rejection),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct SeckillService {
    vouchers: Arc<dyn VouchersRepo>,
    mutex: DistributedMutex,
    ids: IdGenerator,
    lock_lease: Duration,
}

impl SeckillService {
    pub fn new(
        vouchers: Arc<dyn VouchersRepo>,
        mutex: DistributedMutex,
        ids: IdGenerator,
        lock_lease: Duration,
    ) -> Self {
        Self {
            vouchers,
            mutex,
            ids,
            lock_lease,
        }
    }

    /// Try to buy one unit of `voucher_id` for the calling user. Returns the order id.
    pub async fn seckill(&self, ctx: &RequestContext, voucher_id: i64) -> Result<i64, SeckillError> {
        self.seckill_at(ctx, voucher_id, OffsetDateTime::now_utc())
            .await
    }

    /// [`Self::seckill`] evaluated against an explicit clock reading.
    pub async fn seckill_at(
        &self,
        ctx: &RequestContext,
        voucher_id: i64,
        now: OffsetDateTime,
    ) -> Result<i64, SeckillError> {
        let result = self.attempt(ctx, voucher_id, now).await;

        match &result {
            Ok(order_id) => {
                counter!(METRIC_SECKILL_ORDER).increment(1);
                info!(
                    target = "flashsale::application::seckill",
                    op = "seckill",
                    request_id = %ctx.request_id,
                    user_id = ctx.user_id,
                    voucher_id,
                    order_id,
                    result = "ordered",
                    "seckill order created"
                );
            }
            Err(SeckillError::Rejected(rejection)) => {
                counter!(METRIC_SECKILL_REJECTED, "reason" => rejection.as_str()).increment(1);
                debug!(
                    target = "flashsale::application::seckill",
                    op = "seckill",
                    request_id = %ctx.request_id,
                    user_id = ctx.user_id,
                    voucher_id,
                    result = rejection.as_str(),
                    "seckill attempt rejected"
                );
            }
            Err(SeckillError::VoucherNotFound { .. }) => {}
            Err(err) => {
                warn!(
                    target = "flashsale::application::seckill",
                    op = "seckill",
                    request_id = %ctx.request_id,
                    user_id = ctx.user_id,
                    voucher_id,
                    error = %err,
                    result = "error",
                    "seckill attempt failed"
                );
            }
        }

        result
    }

    async fn attempt(
        &self,
        ctx: &RequestContext,
        voucher_id: i64,
        now: OffsetDateTime,
    ) -> Result<i64, SeckillError> {
        let voucher = self
            .vouchers
            .find_seckill_voucher(voucher_id)
            .await?
            .ok_or(SeckillError::VoucherNotFound { voucher_id })?;
        voucher.check_available(now)?;

        let lock_name = order_lock_name(ctx.user_id);
        let Some(handle) = self.mutex.try_acquire(&lock_name, self.lock_lease).await? else {
            return Err(SeckillRejection::TooManyConcurrentAttempts.into());
        };

        self.mutex
            .run_guarded(handle, self.create_order(ctx.user_id, voucher_id, now))
            .await
    }

    async fn create_order(
        &self,
        user_id: i64,
        voucher_id: i64,
        now: OffsetDateTime,
    ) -> Result<i64, SeckillError> {
        let mut tx = self.vouchers.begin_order().await?;

        if tx.has_order(user_id, voucher_id).await? {
            return Err(SeckillRejection::AlreadyPurchased.into());
        }
        if !tx.decrement_stock(voucher_id).await? {
            return Err(SeckillRejection::OutOfStock.into());
        }

        let order = VoucherOrder {
            id: self.ids.next_id(ORDER_ID_TAG).await?,
            user_id,
            voucher_id,
            created_at: now,
        };
        match tx.insert_order(&order).await {
            Ok(()) => {}
            Err(RepoError::Duplicate { .. }) => {
                return Err(SeckillRejection::AlreadyPurchased.into());
            }
            Err(err) => return Err(err.into()),
        }

        tx.commit().await?;
        Ok(order.id)
    }
}
