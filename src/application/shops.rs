use std::sync::Arc;

use tracing::{error, info, warn};

use crate::application::error::AppError;
use crate::application::repos::ShopsRepo;
use crate::cache::{CacheClient, CacheStrategy, KeyPrefix};
use crate::domain::entities::{Shop, ShopUpdate};

#[derive(Clone)]
pub struct ShopService {
    shops: Arc<dyn ShopsRepo>,
    cache: CacheClient,
}

impl ShopService {
    pub fn new(shops: Arc<dyn ShopsRepo>, cache: CacheClient) -> Self {
        Self { shops, cache }
    }

    pub fn strategy(&self) -> CacheStrategy {
        self.cache.config().shop_strategy
    }

    /// Fetch a shop through the configured cache strategy.
    ///
    /// With `logical_expire`, a shop that was never warmed reads as not found.
    pub async fn lookup(&self, id: i64) -> Result<Shop, AppError> {
        let ttl = self.cache.config().shop_ttl;
        let shops = self.shops.clone();
        let fallback = move |id: i64| load_shop(shops, id);

        let found = match self.strategy() {
            CacheStrategy::PassThrough => {
                self.cache
                    .query_with_pass_through(KeyPrefix::SHOP, id, fallback, ttl)
                    .await?
            }
            CacheStrategy::Mutex => {
                self.cache
                    .query_with_mutex(KeyPrefix::SHOP, id, fallback, ttl)
                    .await?
            }
            CacheStrategy::LogicalExpire => {
                self.cache
                    .query_with_logical_expire(KeyPrefix::SHOP, id, fallback, ttl)
                    .await?
            }
        };

        found.ok_or(AppError::NotFound)
    }

    /// Write the row and refresh its cache entry as one unit of work.
    ///
    /// The row is committed only after the cache accepted the change; a cache
    /// failure rolls the write back so store and cache keep agreeing.
    pub async fn update(&self, update: ShopUpdate) -> Result<(), AppError> {
        let update = update.validate()?;
        let key = KeyPrefix::SHOP.key(update.id);

        let mut tx = self.shops.begin_shop_update().await?;
        let shop = tx.update_shop(&update).await?;

        if let Err(err) = self.refresh_cached(&key, &shop).await {
            error!(
                target = "flashsale::application::shops",
                op = "update",
                key = %key,
                error = %err,
                result = "rolled_back",
                "cache refresh failed; shop update rolled back"
            );
            return Err(err);
        }

        if let Err(err) = tx.commit().await {
            // The logical-expire entry already carries the uncommitted row.
            if self.strategy() == CacheStrategy::LogicalExpire {
                if let Err(restore) = self.warm(update.id).await {
                    warn!(
                        target = "flashsale::application::shops",
                        op = "update",
                        key = %key,
                        error = %restore,
                        result = "inconsistent",
                        "commit failed and the cached shop could not be restored"
                    );
                }
            }
            return Err(err.into());
        }

        info!(
            target = "flashsale::application::shops",
            op = "update",
            shop_id = update.id,
            strategy = self.strategy().as_str(),
            "shop updated"
        );
        Ok(())
    }

    /// Logical-expire entries are overwritten in place, since a missing key
    /// reads as not found for that family. The others are dropped and reload
    /// on the next read.
    async fn refresh_cached(&self, key: &str, shop: &Shop) -> Result<(), AppError> {
        match self.strategy() {
            CacheStrategy::LogicalExpire => {
                let ttl = self.cache.config().shop_ttl;
                self.cache.set_with_logical_expire(key, shop, ttl).await?;
            }
            CacheStrategy::PassThrough | CacheStrategy::Mutex => {
                self.cache.invalidate(key).await?;
            }
        }
        Ok(())
    }

    /// Load one shop from the store into the cache. `false` when it does not exist.
    pub async fn warm(&self, id: i64) -> Result<bool, AppError> {
        let Some(shop) = self.shops.find_shop(id).await? else {
            return Ok(false);
        };

        let key = KeyPrefix::SHOP.key(id);
        let ttl = self.cache.config().shop_ttl;
        match self.strategy() {
            CacheStrategy::LogicalExpire => {
                self.cache.set_with_logical_expire(&key, &shop, ttl).await?
            }
            CacheStrategy::PassThrough | CacheStrategy::Mutex => {
                self.cache.set(&key, &shop, ttl).await?
            }
        }
        Ok(true)
    }

    pub async fn list_ids(&self, limit: u32) -> Result<Vec<i64>, AppError> {
        Ok(self.shops.list_shop_ids(limit).await?)
    }
}

async fn load_shop(shops: Arc<dyn ShopsRepo>, id: i64) -> Result<Option<Shop>, AppError> {
    Ok(shops.find_shop(id).await?)
}
