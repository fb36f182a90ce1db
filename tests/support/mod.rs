//! In-memory repositories shared by the integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};

use flashsale::application::repos::{
    OrderTransaction, RepoError, ShopTransaction, ShopTypesRepo, ShopsRepo, VouchersRepo,
};
use flashsale::application::seckill::SeckillService;
use flashsale::application::shop_types::ShopTypeService;
use flashsale::application::shops::ShopService;
use flashsale::cache::{
    CacheClient, CacheConfig, CacheStore, CacheStoreError, CacheStrategy, DistributedMutex,
    IdGenerator, MemoryCacheStore,
};
use flashsale::domain::entities::{SeckillVoucher, Shop, ShopType, ValidShopUpdate, VoucherOrder};
use flashsale::infra::http::HttpState;

pub fn sample_shop(id: i64, name: &str) -> Shop {
    let now = OffsetDateTime::now_utc();
    Shop {
        id,
        name: name.to_string(),
        type_id: 1,
        images: "https://img.example/1.jpg".to_string(),
        area: Some("Downtown".to_string()),
        address: "1 Market Street".to_string(),
        x: 120.149_192,
        y: 30.316_078,
        avg_price: Some(80),
        sold: 4_215,
        comments: 3_035,
        score: 37,
        open_hours: Some("10:00-22:00".to_string()),
        created_at: now,
        updated_at: now,
    }
}

pub fn shop_type(id: i64, name: &str, sort: i32) -> ShopType {
    ShopType {
        id,
        name: name.to_string(),
        icon: format!("/types/{id}.png"),
        sort,
    }
}

/// Shop table whose updates are staged until commit.
#[derive(Default)]
pub struct MemoryShops {
    shops: Arc<Mutex<BTreeMap<i64, Shop>>>,
    finds: AtomicUsize,
}

impl MemoryShops {
    pub fn with(shops: impl IntoIterator<Item = Shop>) -> Self {
        Self {
            shops: Arc::new(Mutex::new(
                shops.into_iter().map(|shop| (shop.id, shop)).collect(),
            )),
            finds: AtomicUsize::new(0),
        }
    }

    pub fn finds(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
    }

    /// Committed row, bypassing the `finds` counter.
    pub async fn committed(&self, id: i64) -> Option<Shop> {
        self.shops.lock().await.get(&id).cloned()
    }

    /// Change a row behind the cache's back.
    pub async fn rename(&self, id: i64, name: &str) {
        if let Some(shop) = self.shops.lock().await.get_mut(&id) {
            shop.name = name.to_string();
        }
    }
}

#[async_trait]
impl ShopsRepo for MemoryShops {
    async fn find_shop(&self, id: i64) -> Result<Option<Shop>, RepoError> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        // Slow enough for concurrent readers to overlap.
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(self.shops.lock().await.get(&id).cloned())
    }

    async fn begin_shop_update(&self) -> Result<Box<dyn ShopTransaction>, RepoError> {
        Ok(Box::new(MemoryShopTransaction {
            shops: self.shops.clone(),
            staged: Vec::new(),
        }))
    }

    async fn list_shop_ids(&self, limit: u32) -> Result<Vec<i64>, RepoError> {
        Ok(self
            .shops
            .lock()
            .await
            .keys()
            .copied()
            .take(limit as usize)
            .collect())
    }
}

struct MemoryShopTransaction {
    shops: Arc<Mutex<BTreeMap<i64, Shop>>>,
    staged: Vec<Shop>,
}

#[async_trait]
impl ShopTransaction for MemoryShopTransaction {
    async fn update_shop(&mut self, update: &ValidShopUpdate) -> Result<Shop, RepoError> {
        let mut shop = self
            .shops
            .lock()
            .await
            .get(&update.id)
            .cloned()
            .ok_or(RepoError::NotFound)?;
        shop.name = update.name.clone();
        shop.type_id = update.type_id;
        shop.images = update.images.clone();
        shop.area = update.area.clone();
        shop.address = update.address.clone();
        shop.x = update.x;
        shop.y = update.y;
        shop.avg_price = update.avg_price;
        shop.open_hours = update.open_hours.clone();
        shop.updated_at = OffsetDateTime::now_utc();
        self.staged.push(shop.clone());
        Ok(shop)
    }

    async fn commit(self: Box<Self>) -> Result<(), RepoError> {
        let mut shops = self.shops.lock().await;
        for shop in self.staged {
            shops.insert(shop.id, shop);
        }
        Ok(())
    }
}

/// Cache store that forwards to a `MemoryCacheStore` until told to fail.
pub struct FaultyStore {
    inner: Arc<MemoryCacheStore>,
    fail_deletes: AtomicBool,
    fail_writes: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryCacheStore>) -> Self {
        Self {
            inner,
            fail_deletes: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Plain `set` only; lock and counter primitives keep working.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStore for FaultyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError> {
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CacheStoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheStoreError::Timeout);
        }
        self.inner.set(key, value, ttl).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheStoreError> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheStoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(CacheStoreError::Timeout);
        }
        self.inner.delete(key).await
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, CacheStoreError> {
        self.inner.delete_if_equals(key, expected).await
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheStoreError> {
        self.inner.incr(key).await
    }
}

#[derive(Default)]
pub struct MemoryShopTypes {
    types: Vec<ShopType>,
    lists: AtomicUsize,
}

impl MemoryShopTypes {
    pub fn with(types: Vec<ShopType>) -> Self {
        Self {
            types,
            lists: AtomicUsize::new(0),
        }
    }

    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShopTypesRepo for MemoryShopTypes {
    async fn list_shop_types(&self) -> Result<Vec<ShopType>, RepoError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        Ok(self.types.clone())
    }
}

#[derive(Default)]
struct VoucherTables {
    vouchers: HashMap<i64, SeckillVoucher>,
    orders: Vec<VoucherOrder>,
}

/// Voucher store whose transactions are serialized and staged until commit.
#[derive(Default)]
pub struct MemoryVouchers {
    tables: Arc<Mutex<VoucherTables>>,
}

impl MemoryVouchers {
    pub fn with(vouchers: impl IntoIterator<Item = SeckillVoucher>) -> Self {
        let tables = VoucherTables {
            vouchers: vouchers
                .into_iter()
                .map(|voucher| (voucher.voucher_id, voucher))
                .collect(),
            orders: Vec::new(),
        };
        Self {
            tables: Arc::new(Mutex::new(tables)),
        }
    }

    pub async fn stock(&self, voucher_id: i64) -> Option<i32> {
        self.tables
            .lock()
            .await
            .vouchers
            .get(&voucher_id)
            .map(|voucher| voucher.stock)
    }

    pub async fn orders(&self) -> Vec<VoucherOrder> {
        self.tables.lock().await.orders.clone()
    }
}

#[async_trait]
impl VouchersRepo for MemoryVouchers {
    async fn find_seckill_voucher(
        &self,
        voucher_id: i64,
    ) -> Result<Option<SeckillVoucher>, RepoError> {
        Ok(self.tables.lock().await.vouchers.get(&voucher_id).cloned())
    }

    async fn begin_order(&self) -> Result<Box<dyn OrderTransaction>, RepoError> {
        let guard = self.tables.clone().lock_owned().await;
        Ok(Box::new(MemoryOrderTransaction {
            guard,
            decremented: HashSet::new(),
            inserted: Vec::new(),
        }))
    }
}

struct MemoryOrderTransaction {
    guard: OwnedMutexGuard<VoucherTables>,
    decremented: HashSet<i64>,
    inserted: Vec<VoucherOrder>,
}

#[async_trait]
impl OrderTransaction for MemoryOrderTransaction {
    async fn has_order(&mut self, user_id: i64, voucher_id: i64) -> Result<bool, RepoError> {
        Ok(self
            .guard
            .orders
            .iter()
            .chain(self.inserted.iter())
            .any(|order| order.user_id == user_id && order.voucher_id == voucher_id))
    }

    async fn decrement_stock(&mut self, voucher_id: i64) -> Result<bool, RepoError> {
        let Some(voucher) = self.guard.vouchers.get(&voucher_id) else {
            return Ok(false);
        };
        let pending = i32::from(self.decremented.contains(&voucher_id));
        if voucher.stock - pending <= 0 {
            return Ok(false);
        }
        self.decremented.insert(voucher_id);
        Ok(true)
    }

    async fn insert_order(&mut self, order: &VoucherOrder) -> Result<(), RepoError> {
        if self.has_order(order.user_id, order.voucher_id).await? {
            return Err(RepoError::Duplicate {
                constraint: "tb_voucher_order_user_voucher_key".to_string(),
            });
        }
        self.inserted.push(order.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepoError> {
        let MemoryOrderTransaction {
            mut guard,
            decremented,
            inserted,
        } = *self;
        for voucher_id in decremented {
            if let Some(voucher) = guard.vouchers.get_mut(&voucher_id) {
                voucher.stock -= 1;
            }
        }
        guard.orders.extend(inserted);
        Ok(())
    }
}

pub fn open_voucher(voucher_id: i64, stock: i32) -> SeckillVoucher {
    let now = OffsetDateTime::now_utc();
    SeckillVoucher {
        voucher_id,
        stock,
        begin_time: now - time::Duration::hours(1),
        end_time: now + time::Duration::hours(1),
    }
}

pub fn cache_config(strategy: CacheStrategy) -> CacheConfig {
    CacheConfig {
        shop_strategy: strategy,
        mutex_retry_backoff: Duration::from_millis(5),
        ..CacheConfig::default()
    }
}

pub struct Harness {
    pub store: Arc<MemoryCacheStore>,
    pub faults: Arc<FaultyStore>,
    pub cache: CacheClient,
    pub shops_repo: Arc<MemoryShops>,
    pub shop_types_repo: Arc<MemoryShopTypes>,
    pub vouchers_repo: Arc<MemoryVouchers>,
    pub shops: ShopService,
    pub shop_types: ShopTypeService,
    pub seckill: SeckillService,
}

impl Harness {
    pub fn new(strategy: CacheStrategy) -> Self {
        Self::with_data(
            strategy,
            vec![sample_shop(1, "Tea House"), sample_shop(2, "Noodle Bar")],
            vec![shop_type(2, "KTV", 2), shop_type(1, "Food", 1)],
            vec![open_voucher(10, 100)],
        )
    }

    pub fn with_data(
        strategy: CacheStrategy,
        shops: Vec<Shop>,
        types: Vec<ShopType>,
        vouchers: Vec<SeckillVoucher>,
    ) -> Self {
        let store = Arc::new(MemoryCacheStore::new());
        let faults = Arc::new(FaultyStore::new(store.clone()));
        let cache = CacheClient::new(faults.clone(), cache_config(strategy));
        let shops_repo = Arc::new(MemoryShops::with(shops));
        let shop_types_repo = Arc::new(MemoryShopTypes::with(types));
        let vouchers_repo = Arc::new(MemoryVouchers::with(vouchers));

        Self {
            shops: ShopService::new(shops_repo.clone(), cache.clone()),
            shop_types: ShopTypeService::new(shop_types_repo.clone(), cache.clone()),
            seckill: SeckillService::new(
                vouchers_repo.clone(),
                DistributedMutex::new(faults.clone()),
                IdGenerator::new(faults.clone()),
                Duration::from_secs(1_200),
            ),
            store,
            faults,
            cache,
            shops_repo,
            shop_types_repo,
            vouchers_repo,
        }
    }

    pub fn http_state(&self) -> HttpState {
        HttpState {
            shops: Arc::new(self.shops.clone()),
            shop_types: Arc::new(self.shop_types.clone()),
            seckill: Arc::new(self.seckill.clone()),
            db: None,
        }
    }
}
