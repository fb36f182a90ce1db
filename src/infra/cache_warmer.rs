use std::time::Instant;

use thiserror::Error;
use tracing::{info, warn};

use crate::application::{error::AppError, shops::ShopService};

#[derive(Debug, Error)]
pub enum CacheWarmError {
    #[error("failed to list shops to warm: {0}")]
    ListShops(#[source] AppError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WarmReport {
    pub warmed: usize,
    pub missing: usize,
    pub failed: usize,
}

/// Primes the shop family so logical-expire lookups never start cold.
pub struct CacheWarmer {
    shops: ShopService,
    limit: u32,
}

impl CacheWarmer {
    pub fn new(shops: ShopService, limit: u32) -> Self {
        Self { shops, limit }
    }

    pub async fn warm_shops(&self) -> Result<WarmReport, CacheWarmError> {
        let started = Instant::now();
        info!(
            target = "flashsale::cache_warmer",
            limit = self.limit,
            strategy = self.shops.strategy().as_str(),
            "warming shop cache"
        );

        let ids = self
            .shops
            .list_ids(self.limit)
            .await
            .map_err(CacheWarmError::ListShops)?;

        let mut report = WarmReport::default();
        for id in ids {
            match self.shops.warm(id).await {
                Ok(true) => report.warmed += 1,
                // Deleted between listing and loading.
                Ok(false) => report.missing += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        target = "flashsale::cache_warmer",
                        shop_id = id,
                        error = %err,
                        "failed to warm shop"
                    );
                }
            }
        }

        info!(
            target = "flashsale::cache_warmer",
            warmed = report.warmed,
            missing = report.missing,
            failed = report.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "shop cache warmed"
        );
        Ok(report)
    }
}
