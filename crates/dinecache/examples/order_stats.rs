//! Cache-aside walkthrough over the in-process durable tier.
//!
//! Run with `RUST_LOG=dinecache=debug` to see tier traffic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dinecache::cache::{InMemoryRemoteStore, TracingMetrics};
use dinecache::{CacheOrchestrator, Config};
use dinecache_core::cache::{order_stats_key, restaurant_orders_key, restaurant_orders_pattern};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderStats {
    total: u32,
    open: u32,
}

#[derive(Serialize)]
struct OrderFilters<'a> {
    status: &'a str,
    channel: &'a str,
}

/// Stands in for the relational store.
struct OrderRepository {
    queries: AtomicUsize,
}

impl OrderRepository {
    async fn order_stats(&self, _restaurant_id: &str) -> Result<OrderStats> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(OrderStats { total: 5, open: 2 })
    }

    async fn open_orders(&self, _restaurant_id: &str) -> Result<Vec<String>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(vec!["order-1".to_string(), "order-2".to_string()])
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dinecache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let remote = Arc::new(InMemoryRemoteStore::new());
    let cache = CacheOrchestrator::new(&config, remote.clone(), Arc::new(TracingMetrics));
    let repository = OrderRepository {
        queries: AtomicUsize::new(0),
    };
    let restaurant = "R1";
    let ttl = config.default_ttl();

    let stats_key = order_stats_key(restaurant);
    let list_key = restaurant_orders_key(
        restaurant,
        &OrderFilters {
            status: "open",
            channel: "web",
        },
    )?;

    for _ in 0..3 {
        let stats = cache
            .get_or_set(&stats_key, ttl, || repository.order_stats(restaurant))
            .await?;
        let orders = cache
            .get_or_set(&list_key, ttl, || repository.open_orders(restaurant))
            .await?;
        println!("{stats_key} -> {stats:?}, {list_key} -> {orders:?}");
    }
    println!(
        "repository queried {} times for 6 reads",
        repository.queries.load(Ordering::SeqCst)
    );

    // A new order lands: every cached view of the restaurant's orders goes stale
    let removed = cache
        .invalidate(&restaurant_orders_pattern(restaurant))
        .await?;
    println!("invalidated {removed} keys");

    remote.set_failing(true);
    let stats = cache
        .get_or_set(&stats_key, ttl, || repository.order_stats(restaurant))
        .await?;
    println!(
        "with L2 failing: {stats:?}, L2 status {}, repository queried {} times",
        cache.l2_status(),
        repository.queries.load(Ordering::SeqCst)
    );

    cache.close().await;
    Ok(())
}
