//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency. Every test
//! truncates the tables, so they run serially.
//!
//! ```bash
//! cargo test -p store --test postgres_integration
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::{UserId, Version};
use domain::{
    Actor, Address, BillingAddress, Cart, CartStatus, Coupon, Customer, DiscountRule, LineItem,
    Money, NewOrder, Order, OrderNumber, OrderStatus, PaymentMethod, PricingEngine, Product,
    ShippingMethod, TransitionRequest, Variant,
};
use serial_test::serial;
use sqlx::PgPool;
use store::{
    CartStore, CatalogStore, CouponStore, OrderStore, PostgresStore, StockDecrement, StoreError,
    UsageIncrement,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_commerce_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE orders, coupons, carts, stock_levels, products")
        .execute(&pool)
        .await
        .unwrap();

    PostgresStore::new(pool)
}

fn address() -> Address {
    Address {
        full_name: "Nusrat Jahan".to_string(),
        phone: "+8801900000000".to_string(),
        email: Some("nusrat@example.com".to_string()),
        line1: "Lake Road".to_string(),
        line2: None,
        city: "Chattogram".to_string(),
        state: Some("Chattogram".to_string()),
        postal_code: None,
        country: "BD".to_string(),
    }
}

fn sample_order(number: &str, token: Option<&str>, user_id: UserId) -> Order {
    let product = Product::new("Tea", Money::from_major(12), 100);
    let items = vec![LineItem::from_catalog(&product, None, 3).unwrap()];
    let engine = PricingEngine::default();
    let pricing = engine
        .compute(&items, ShippingMethod::Standard, &address(), None)
        .unwrap();
    let shipping = engine
        .quote_shipping(ShippingMethod::Standard, &address(), pricing.subtotal)
        .unwrap();

    Order::place(
        NewOrder {
            request_token: token.map(str::to_string),
            customer: Customer::Registered {
                user_id,
                email: None,
            },
            items,
            shipping_address: address(),
            billing: BillingAddress::SameAsShipping,
            payment_method: PaymentMethod::CashOnDelivery,
            pricing,
            coupon: None,
            shipping,
            notes: Some("leave at the gate".to_string()),
        },
        OrderNumber::new(number),
        Utc::now(),
    )
    .unwrap()
}

#[tokio::test]
#[serial]
async fn product_round_trip_with_variant_stock() {
    let store = get_test_store().await;
    let mut product = Product::new("Kurta", Money::from_major(900), 4);
    let variant = product.add_variant(Variant::new("M", 2).with_price(Money::from_major(950)));
    store.save_product(&product).await.unwrap();

    let loaded = store.get_product(product.id).await.unwrap().unwrap();
    assert_eq!(loaded, product);
    assert_eq!(loaded.stock_record(Some(variant)).map(|r| r.stock), Some(2));

    assert!(store.get_product(common::ProductId::new()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn conditional_decrement_and_restock() {
    let store = get_test_store().await;
    let product = Product::new("Kurta", Money::from_major(900), 3);
    store.save_product(&product).await.unwrap();

    assert_eq!(
        store.try_decrement_stock(product.id, None, 2).await.unwrap(),
        StockDecrement::Applied { remaining: 1 }
    );
    assert_eq!(
        store.try_decrement_stock(product.id, None, 2).await.unwrap(),
        StockDecrement::Insufficient { available: 1 }
    );
    assert_eq!(store.restock(product.id, None, 4).await.unwrap(), 5);

    let loaded = store.get_product(product.id).await.unwrap().unwrap();
    assert_eq!(loaded.inventory.stock, 5);
}

#[tokio::test]
#[serial]
async fn untracked_stock_is_never_decremented() {
    let store = get_test_store().await;
    let mut product = Product::new("E-book", Money::from_major(50), 0);
    product.inventory = domain::StockRecord::untracked();
    store.save_product(&product).await.unwrap();

    assert_eq!(
        store.try_decrement_stock(product.id, None, 1000).await.unwrap(),
        StockDecrement::Applied { remaining: 0 }
    );
}

#[tokio::test]
#[serial]
async fn decrement_missing_variant_is_not_found() {
    let store = get_test_store().await;
    let product = Product::new("Kurta", Money::from_major(900), 3);
    store.save_product(&product).await.unwrap();

    let result = store
        .try_decrement_stock(product.id, Some(common::VariantId::new()), 1)
        .await;
    assert!(matches!(result, Err(StoreError::NotFound { .. })));
}

#[tokio::test]
#[serial]
async fn concurrent_decrements_never_oversell() {
    let store = get_test_store().await;
    let product = Product::new("Limited Print", Money::from_major(1500), 5);
    store.save_product(&product).await.unwrap();

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let store = store.clone();
            let id = product.id;
            tokio::spawn(async move { store.try_decrement_stock(id, None, 1).await.unwrap() })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), StockDecrement::Applied { .. }) {
            applied += 1;
        }
    }

    assert_eq!(applied, 5);
    let loaded = store.get_product(product.id).await.unwrap().unwrap();
    assert_eq!(loaded.inventory.stock, 0);
}

#[tokio::test]
#[serial]
async fn coupon_usage_is_bounded_by_limit() {
    let store = get_test_store().await;
    let coupon = Coupon::new(
        "eid25",
        DiscountRule::Percent {
            percent: 25,
            max_discount: None,
        },
    )
    .unwrap()
    .with_usage_limit(2);
    store.save_coupon(&coupon).await.unwrap();

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let store = store.clone();
            let id = coupon.id;
            tokio::spawn(async move { store.try_increment_usage(id).await.unwrap() })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), UsageIncrement::Applied { .. }) {
            applied += 1;
        }
    }
    assert_eq!(applied, 2);

    let found = store.find_coupon("EID25").await.unwrap().unwrap();
    assert_eq!(found.usage_count, 2);

    store.release_usage(coupon.id).await.unwrap();
    let found = store.find_coupon("eid25").await.unwrap().unwrap();
    assert_eq!(found.usage_count, 1);
}

#[tokio::test]
#[serial]
async fn cart_conversion_clears_items() {
    let store = get_test_store().await;
    let user = UserId::new();
    let mut cart = Cart::new(user);
    cart.add(common::ProductId::new(), None, 1);
    store.save_cart(&cart).await.unwrap();

    store.convert_cart(user).await.unwrap();

    let cart = store.get_cart(user).await.unwrap().unwrap();
    assert!(cart.is_empty());
    assert_eq!(cart.status, CartStatus::Converted);
}

#[tokio::test]
#[serial]
async fn order_insert_enforces_unique_number_and_token() {
    let store = get_test_store().await;
    let user = UserId::new();

    let version = store
        .insert_order(&sample_order("ORD-20240101000000-0001", Some("idem-1"), user))
        .await
        .unwrap();
    assert_eq!(version, Version::first());

    let result = store
        .insert_order(&sample_order("ORD-20240101000000-0001", None, user))
        .await;
    assert!(matches!(result, Err(StoreError::DuplicateOrderNumber(_))));

    let result = store
        .insert_order(&sample_order("ORD-20240101000000-0002", Some("idem-1"), user))
        .await;
    assert!(matches!(result, Err(StoreError::DuplicateRequestToken(_))));

    let found = store.find_by_request_token("idem-1").await.unwrap().unwrap();
    assert_eq!(found.order_number().as_str(), "ORD-20240101000000-0001");
    assert_eq!(found.notes(), Some("leave at the gate"));
}

#[tokio::test]
#[serial]
async fn order_save_uses_optimistic_concurrency() {
    let store = get_test_store().await;
    let user = UserId::new();
    let number = OrderNumber::new("ORD-20240101000000-0003");
    store
        .insert_order(&sample_order(number.as_str(), None, user))
        .await
        .unwrap();

    let mut first = store.find_by_order_number(&number).await.unwrap().unwrap();
    let mut second = first.clone();

    first
        .transition(
            TransitionRequest::new(OrderStatus::Confirmed, Actor::System),
            Utc::now(),
        )
        .unwrap();
    assert_eq!(store.save_order(&first).await.unwrap(), Version::new(2));

    second
        .transition(
            TransitionRequest::new(OrderStatus::Cancelled, Actor::System),
            Utc::now(),
        )
        .unwrap();
    let result = store.save_order(&second).await;
    assert!(matches!(
        result,
        Err(StoreError::Conflict { expected, actual, .. })
            if expected == Version::first() && actual == Version::new(2)
    ));

    let stored = store.find_by_order_number(&number).await.unwrap().unwrap();
    assert_eq!(stored.status(), OrderStatus::Confirmed);
    assert_eq!(stored.version(), Version::new(2));
    assert_eq!(stored.tracking().len(), 2);
}

#[tokio::test]
#[serial]
async fn active_orders_exclude_cancelled() {
    let store = get_test_store().await;
    let user = UserId::new();

    store
        .insert_order(&sample_order("ORD-A", None, user))
        .await
        .unwrap();
    let number = OrderNumber::new("ORD-B");
    store
        .insert_order(&sample_order(number.as_str(), None, user))
        .await
        .unwrap();
    assert_eq!(store.count_active_orders(user).await.unwrap(), 2);

    let mut order = store.find_by_order_number(&number).await.unwrap().unwrap();
    order
        .transition(
            TransitionRequest::new(OrderStatus::Cancelled, Actor::System),
            Utc::now(),
        )
        .unwrap();
    store.save_order(&order).await.unwrap();

    assert_eq!(store.count_active_orders(user).await.unwrap(), 1);
    assert_eq!(store.count_active_orders(UserId::new()).await.unwrap(), 0);
}
