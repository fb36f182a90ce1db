use std::sync::Arc;

use crate::application::error::AppError;
use crate::application::repos::ShopTypesRepo;
use crate::cache::{CacheClient, KeyPrefix};
use crate::domain::entities::ShopType;

const LIST_ID: &str = "list";

#[derive(Clone)]
pub struct ShopTypeService {
    shop_types: Arc<dyn ShopTypesRepo>,
    cache: CacheClient,
}

impl ShopTypeService {
    pub fn new(shop_types: Arc<dyn ShopTypesRepo>, cache: CacheClient) -> Self {
        Self { shop_types, cache }
    }

    /// All shop types ordered by `sort`. An empty catalogue is cached as absent.
    pub async fn list(&self) -> Result<Vec<ShopType>, AppError> {
        let repo = self.shop_types.clone();
        let ttl = self.cache.config().shop_type_ttl;

        self.cache
            .query_with_pass_through(
                KeyPrefix::SHOP_TYPE,
                LIST_ID,
                move |_| load_shop_types(repo),
                ttl,
            )
            .await?
            .ok_or(AppError::NotFound)
    }
}

async fn load_shop_types(repo: Arc<dyn ShopTypesRepo>) -> Result<Option<Vec<ShopType>>, AppError> {
    let mut types = repo.list_shop_types().await?;
    if types.is_empty() {
        return Ok(None);
    }
    types.sort_by_key(|shop_type| shop_type.sort);
    Ok(Some(types))
}
