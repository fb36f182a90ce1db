//! Flash-sale rules that do not depend on storage.

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::entities::SeckillVoucher;

/// Expected, non-exceptional reasons an order attempt is turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum SeckillRejection {
    #[error("the flash sale has not started yet")]
    NotStarted,
    #[error("the flash sale has ended")]
    Ended,
    #[error("the voucher is out of stock")]
    OutOfStock,
    #[error("each user may only buy this voucher once")]
    AlreadyPurchased,
    #[error("another order attempt by this user is in progress")]
    TooManyConcurrentAttempts,
}

impl SeckillRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Ended => "ended",
            Self::OutOfStock => "out_of_stock",
            Self::AlreadyPurchased => "already_purchased",
            Self::TooManyConcurrentAttempts => "too_many_concurrent_attempts",
        }
    }
}

impl SeckillVoucher {
    /// Lock-free pre-check of the sale window and remaining stock.
    ///
    /// Stock read here is advisory; the conditional decrement decides.
    pub fn check_available(&self, now: OffsetDateTime) -> Result<(), SeckillRejection> {
        if self.begin_time > now {
            return Err(SeckillRejection::NotStarted);
        }
        if self.end_time < now {
            return Err(SeckillRejection::Ended);
        }
        if self.stock < 1 {
            return Err(SeckillRejection::OutOfStock);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn voucher(stock: i32) -> SeckillVoucher {
        SeckillVoucher {
            voucher_id: 1,
            stock,
            begin_time: datetime!(2024-06-01 10:00 UTC),
            end_time: datetime!(2024-06-01 12:00 UTC),
        }
    }

    #[test]
    fn window_is_checked_before_stock() {
        let empty = voucher(0);
        assert_eq!(
            empty.check_available(datetime!(2024-06-01 09:59 UTC)),
            Err(SeckillRejection::NotStarted)
        );
        assert_eq!(
            empty.check_available(datetime!(2024-06-01 12:01 UTC)),
            Err(SeckillRejection::Ended)
        );
        assert_eq!(
            empty.check_available(datetime!(2024-06-01 11:00 UTC)),
            Err(SeckillRejection::OutOfStock)
        );
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let v = voucher(3);
        assert_eq!(v.check_available(v.begin_time), Ok(()));
        assert_eq!(v.check_available(v.end_time), Ok(()));
    }

    #[test]
    fn rejection_codes_are_snake_case() {
        assert_eq!(
            serde_json::to_value(SeckillRejection::TooManyConcurrentAttempts).expect("json"),
            "too_many_concurrent_attempts"
        );
        assert_eq!(SeckillRejection::AlreadyPurchased.as_str(), "already_purchased");
    }
}
