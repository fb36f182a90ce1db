mod support;

use std::sync::OnceLock;

use flashsale::application::context::RequestContext;
use flashsale::cache::envelope::{CacheEntry, encode};
use flashsale::cache::{CacheStore, CacheStrategy, KeyPrefix};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serial_test::serial;
use time::OffsetDateTime;

use support::{Harness, sample_shop};

fn snapshotter() -> &'static Snapshotter {
    static SNAPSHOTTER: OnceLock<Snapshotter> = OnceLock::new();
    SNAPSHOTTER.get_or_init(|| {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        recorder
            .install()
            .expect("debug metrics recorder should install in this test process");
        snapshotter
    })
}

/// Counter values captured by one snapshot. Snapshots drain counters, so a
/// test clears leftovers with `Counters::reset` and reads once at the end.
struct Counters(Vec<(String, Vec<(String, String)>, u64)>);

impl Counters {
    fn reset() {
        snapshotter().snapshot();
    }

    fn take() -> Self {
        let counters = snapshotter()
            .snapshot()
            .into_vec()
            .into_iter()
            .filter_map(|(composite_key, _, _, value)| match value {
                DebugValue::Counter(count) => {
                    let key = composite_key.key();
                    let labels = key
                        .labels()
                        .map(|label| (label.key().to_string(), label.value().to_string()))
                        .collect();
                    Some((key.name().to_string(), labels, count))
                }
                _ => None,
            })
            .collect();
        Self(counters)
    }

    /// Sum across label sets, optionally filtered by one label.
    fn get(&self, name: &str, label: Option<(&str, &str)>) -> u64 {
        self.0
            .iter()
            .filter(|(counter, _, _)| counter == name)
            .filter(|(_, labels, _)| {
                label.is_none_or(|(key, value)| {
                    labels.iter().any(|(k, v)| k == key && v == value)
                })
            })
            .map(|(_, _, count)| count)
            .sum()
    }
}

const SHOP_FAMILY: (&str, &str) = ("family", "cache:shop");

#[tokio::test]
#[serial]
async fn pass_through_lookups_count_hits_misses_and_null_hits() {
    let harness = Harness::new(CacheStrategy::PassThrough);
    Counters::reset();

    harness.shops.lookup(1).await.expect("miss then load");
    harness.shops.lookup(1).await.expect("hit");
    harness.shops.lookup(404).await.expect_err("miss");
    harness.shops.lookup(404).await.expect_err("null hit");

    let counters = Counters::take();
    assert_eq!(counters.get("flashsale_cache_miss_total", Some(SHOP_FAMILY)), 2);
    assert_eq!(counters.get("flashsale_cache_hit_total", Some(SHOP_FAMILY)), 1);
    assert_eq!(
        counters.get("flashsale_cache_null_hit_total", Some(SHOP_FAMILY)),
        1
    );
}

#[tokio::test]
#[serial]
async fn stale_entries_count_a_stale_hit_and_one_rebuild() {
    let harness = Harness::new(CacheStrategy::LogicalExpire);

    let stale = CacheEntry::expiring_at(
        sample_shop(1, "Old Tea House"),
        OffsetDateTime::now_utc() - time::Duration::seconds(1),
    );
    harness
        .store
        .set(&KeyPrefix::SHOP.key(1), &encode(&stale).expect("encode"), None)
        .await
        .expect("seed stale entry");
    Counters::reset();

    harness.shops.lookup(1).await.expect("stale hit");
    harness.cache.wait_for_rebuilds().await;

    let counters = Counters::take();
    assert_eq!(
        counters.get("flashsale_cache_stale_hit_total", Some(SHOP_FAMILY)),
        1
    );
    assert_eq!(counters.get("flashsale_cache_rebuild_total", None), 1);
    assert_eq!(counters.get("flashsale_cache_rebuild_failed_total", None), 0);
}

#[tokio::test]
#[serial]
async fn seckill_counts_orders_and_rejections_by_reason() {
    let harness = Harness::new(CacheStrategy::PassThrough);
    Counters::reset();

    let ctx = RequestContext::new("req-metrics", 7);
    harness.seckill.seckill(&ctx, 10).await.expect("order");
    harness.seckill.seckill(&ctx, 10).await.expect_err("duplicate");

    let counters = Counters::take();
    assert_eq!(counters.get("flashsale_seckill_order_total", None), 1);
    assert_eq!(
        counters.get(
            "flashsale_seckill_rejected_total",
            Some(("reason", "already_purchased"))
        ),
        1
    );
}
