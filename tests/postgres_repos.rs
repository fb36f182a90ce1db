//! Repository checks against a real Postgres. Run with `DATABASE_URL` set and `--ignored`.

use std::sync::Arc;
use std::time::Duration;

use flashsale::application::context::RequestContext;
use flashsale::application::repos::{
    OrderTransaction, RepoError, ShopTransaction, ShopTypesRepo, ShopsRepo, VouchersRepo,
};
use flashsale::application::seckill::SeckillService;
use flashsale::cache::{DistributedMutex, IdGenerator, MemoryCacheStore};
use flashsale::domain::entities::{ShopUpdate, VoucherOrder};
use flashsale::domain::seckill::SeckillRejection;
use flashsale::infra::db::PostgresRepositories;
use sqlx::PgPool;
use time::OffsetDateTime;

async fn seed(pool: &PgPool, stock: i32) {
    sqlx::query("INSERT INTO tb_shop_type (id, name, icon, sort) VALUES (1, 'Food', '', 2), (2, 'KTV', '', 1)")
        .execute(pool)
        .await
        .expect("seed shop types");
    sqlx::query(
        "INSERT INTO tb_shop (id, name, type_id, address, x, y, score) VALUES (1, 'Tea House', 1, '1 Market Street', 120.1, 30.2, 37)",
    )
    .execute(pool)
    .await
    .expect("seed shop");

    let now = OffsetDateTime::now_utc();
    sqlx::query(
        "INSERT INTO tb_seckill_voucher (voucher_id, stock, begin_time, end_time) VALUES (10, $1, $2, $3)",
    )
    .bind(stock)
    .bind(now - time::Duration::hours(1))
    .bind(now + time::Duration::hours(1))
    .execute(pool)
    .await
    .expect("seed voucher");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn shops_round_trip_through_postgres(pool: PgPool) {
    seed(&pool, 1).await;
    let repos = PostgresRepositories::new(pool);

    let shop = repos.find_shop(1).await.expect("query").expect("shop 1");
    assert_eq!(shop.name, "Tea House");
    assert!(repos.find_shop(404).await.expect("query").is_none());

    let update = ShopUpdate {
        id: Some(1),
        name: "Tea Garden".to_string(),
        type_id: 1,
        images: String::new(),
        area: None,
        address: "1 Market Street".to_string(),
        x: 120.1,
        y: 30.2,
        avg_price: Some(60),
        open_hours: None,
    }
    .validate()
    .expect("valid update");
    let mut tx: Box<dyn ShopTransaction> = repos.begin_shop_update().await.expect("begin");
    let written = tx.update_shop(&update).await.expect("update");
    assert_eq!(written.name, "Tea Garden");
    drop(tx);
    let shop = repos.find_shop(1).await.expect("query").expect("shop 1");
    assert_eq!(shop.name, "Tea House");

    let mut tx = repos.begin_shop_update().await.expect("begin");
    tx.update_shop(&update).await.expect("update");
    tx.commit().await.expect("commit");
    let shop = repos.find_shop(1).await.expect("query").expect("shop 1");
    assert_eq!(shop.name, "Tea Garden");

    let mut tx = repos.begin_shop_update().await.expect("begin");
    let missing = ShopUpdate {
        id: Some(404),
        name: "Ghost".to_string(),
        type_id: 1,
        images: String::new(),
        area: None,
        address: "nowhere".to_string(),
        x: 0.0,
        y: 0.0,
        avg_price: None,
        open_hours: None,
    }
    .validate()
    .expect("valid update");
    assert!(matches!(
        tx.update_shop(&missing).await,
        Err(RepoError::NotFound)
    ));

    let types = repos.list_shop_types().await.expect("types");
    let names: Vec<_> = types.iter().map(|shop_type| shop_type.name.as_str()).collect();
    assert_eq!(names, ["KTV", "Food"]);
    assert_eq!(repos.list_shop_ids(10).await.expect("ids"), vec![1]);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn conditional_decrement_stops_at_zero(pool: PgPool) {
    seed(&pool, 3).await;
    let repos = Arc::new(PostgresRepositories::new(pool.clone()));
    let store = Arc::new(MemoryCacheStore::new());
    let service = Arc::new(SeckillService::new(
        repos.clone(),
        DistributedMutex::new(store.clone()),
        IdGenerator::new(store),
        Duration::from_secs(60),
    ));

    let mut tasks = Vec::new();
    for user_id in 1..=12 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            service
                .seckill(&RequestContext::new("pg", user_id), 10)
                .await
        }));
    }

    let mut ordered = 0;
    for task in tasks {
        match task.await.expect("join") {
            Ok(_) => ordered += 1,
            Err(err) => assert_eq!(err.rejection(), Some(SeckillRejection::OutOfStock)),
        }
    }
    assert_eq!(ordered, 3);

    let voucher = repos
        .find_seckill_voucher(10)
        .await
        .expect("query")
        .expect("voucher");
    assert_eq!(voucher.stock, 0);

    let orders: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tb_voucher_order")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(orders, 3);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a Postgres DATABASE_URL"]
async fn unique_index_rejects_a_second_order(pool: PgPool) {
    seed(&pool, 5).await;
    let repos = PostgresRepositories::new(pool);

    let mut tx: Box<dyn OrderTransaction> = repos.begin_order().await.expect("begin");
    let order = VoucherOrder {
        id: 1,
        user_id: 7,
        voucher_id: 10,
        created_at: OffsetDateTime::now_utc(),
    };
    tx.insert_order(&order).await.expect("first insert");
    tx.commit().await.expect("commit");

    let mut tx: Box<dyn OrderTransaction> = repos.begin_order().await.expect("begin");
    let duplicate = VoucherOrder { id: 2, ..order };
    let err = tx.insert_order(&duplicate).await.expect_err("duplicate");
    assert!(matches!(err, RepoError::Duplicate { .. }));
}
