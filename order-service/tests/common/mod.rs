#![allow(dead_code)]

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use order_service::models::*;
use order_service::schema::*;
use order_service::{DbPool, EngineConfig, OrderLifecycle};
use shared::*;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

// Sweeps act on every row in the table, so database tests run one at a time.
static DB_LOCK: Mutex<()> = Mutex::const_new(());

pub const SHOP: (f64, f64) = (18.5204, 73.8567);

pub struct TestDb {
    pub pool: DbPool,
    _guard: MutexGuard<'static, ()>,
}

/// Connects to `TEST_DATABASE_URL`, or returns `None` so the test is skipped.
pub async fn test_db() -> Option<TestDb> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping database test");
        return None;
    };
    let guard = DB_LOCK.lock().await;

    let migrate_url = url.clone();
    tokio::task::spawn_blocking(move || order_service::run_migrations(&migrate_url))
        .await
        .expect("migration task panicked")
        .expect("migrations failed");

    let pool = order_service::connect_pool(&url).await.expect("pool");
    Some(TestDb {
        pool,
        _guard: guard,
    })
}

pub fn lifecycle(db: &TestDb, config: EngineConfig) -> OrderLifecycle {
    OrderLifecycle::new(db.pool.clone(), config)
}

pub fn dec(value: &str) -> BigDecimal {
    value.parse().expect("decimal literal")
}

#[derive(Debug, Clone, Copy)]
pub struct Listing {
    pub vendor_id: Uuid,
    pub product_id: Uuid,
    pub unit_id: Uuid,
}

pub async fn seed_vendor(db: &TestDb) -> Uuid {
    let mut conn = db.pool.get().await.expect("connection");
    let id = Uuid::new_v4();
    diesel::insert_into(vendors::table)
        .values((
            vendors::id.eq(id),
            vendors::name.eq(format!("Corner Store {}", &id.to_string()[..8])),
            vendors::latitude.eq(SHOP.0),
            vendors::longitude.eq(SHOP.1),
        ))
        .execute(&mut conn)
        .await
        .expect("insert vendor");
    id
}

pub async fn seed_product(db: &TestDb, vendor_id: Uuid, price: &str, stock: &str, return_window_days: i32) -> Listing {
    let mut conn = db.pool.get().await.expect("connection");
    let product_id = Uuid::new_v4();
    let unit_id = Uuid::new_v4();

    diesel::insert_into(products::table)
        .values((
            products::id.eq(product_id),
            products::vendor_id.eq(vendor_id),
            products::name.eq("Basmati Rice"),
            products::return_window_days.eq(return_window_days),
        ))
        .execute(&mut conn)
        .await
        .expect("insert product");
    diesel::insert_into(product_units::table)
        .values((
            product_units::id.eq(unit_id),
            product_units::product_id.eq(product_id),
            product_units::label.eq("1 kg"),
            product_units::price.eq(dec(price)),
        ))
        .execute(&mut conn)
        .await
        .expect("insert unit");
    diesel::insert_into(inventory::table)
        .values((
            inventory::id.eq(Uuid::new_v4()),
            inventory::product_id.eq(product_id),
            inventory::available_quantity.eq(dec(stock)),
        ))
        .execute(&mut conn)
        .await
        .expect("insert inventory");

    Listing {
        vendor_id,
        product_id,
        unit_id,
    }
}

pub async fn seed_listing(db: &TestDb, price: &str, stock: &str) -> Listing {
    let vendor_id = seed_vendor(db).await;
    seed_product(db, vendor_id, price, stock, 7).await
}

/// A 10% coupon capped at 100, like SAVE10, under a unique code.
pub async fn seed_percentage_coupon(db: &TestDb) -> String {
    seed_coupon(db, Some(1000), Some(1)).await
}

pub async fn seed_coupon(db: &TestDb, usage_limit: Option<i32>, per_user_limit: Option<i32>) -> String {
    let mut conn = db.pool.get().await.expect("connection");
    let code = format!("SAVE10{}", &Uuid::new_v4().simple().to_string()[..6]).to_ascii_uppercase();
    diesel::insert_into(coupons::table)
        .values((
            coupons::id.eq(Uuid::new_v4()),
            coupons::code.eq(&code),
            coupons::discount_kind.eq("percentage"),
            coupons::discount_value.eq(dec("10")),
            coupons::max_discount.eq(Some(dec("100"))),
            coupons::usage_limit.eq(usage_limit),
            coupons::per_user_limit.eq(per_user_limit),
            coupons::valid_from.eq(Utc::now() - Duration::days(1)),
        ))
        .execute(&mut conn)
        .await
        .expect("insert coupon");
    code
}

pub async fn coupon_row(db: &TestDb, code: &str) -> Coupon {
    let mut conn = db.pool.get().await.expect("connection");
    coupons::table
        .filter(coupons::code.eq(code))
        .first::<Coupon>(&mut conn)
        .await
        .expect("coupon row")
}

pub fn checkout(lines: &[(Listing, &str)], payment_mode: PaymentMode) -> Checkout {
    Checkout {
        lines: lines
            .iter()
            .map(|(listing, quantity)| CartLine {
                product_id: listing.product_id,
                sell_unit_id: listing.unit_id,
                quantity: dec(quantity),
            })
            .collect(),
        delivery_address: DeliveryAddress {
            line1: "12 MG Road".to_string(),
            line2: None,
            city: "Pune".to_string(),
            postal_code: "411001".to_string(),
            latitude: SHOP.0,
            longitude: SHOP.1,
        },
        payment_mode,
        coupon_code: None,
    }
}

pub fn buyer() -> Actor {
    Actor::Buyer(Uuid::new_v4())
}

pub fn admin() -> Actor {
    Actor::Admin(Uuid::new_v4())
}

pub async fn order_row(db: &TestDb, order_id: Uuid) -> Order {
    let mut conn = db.pool.get().await.expect("connection");
    orders::table
        .find(order_id)
        .first::<Order>(&mut conn)
        .await
        .expect("order row")
}

pub async fn inventory_row(db: &TestDb, product_id: Uuid) -> Inventory {
    let mut conn = db.pool.get().await.expect("connection");
    inventory::table
        .filter(inventory::product_id.eq(product_id))
        .first::<Inventory>(&mut conn)
        .await
        .expect("inventory row")
}

pub async fn outbox_types(db: &TestDb, aggregate_id: Uuid) -> Vec<String> {
    let mut conn = db.pool.get().await.expect("connection");
    outbox_events::table
        .filter(outbox_events::aggregate_id.eq(aggregate_id))
        .order(outbox_events::created_at.asc())
        .select(outbox_events::event_type)
        .load::<String>(&mut conn)
        .await
        .expect("outbox rows")
}

pub async fn refund_requests(db: &TestDb, order_id: Uuid) -> Vec<EngineEvent> {
    let mut conn = db.pool.get().await.expect("connection");
    outbox_events::table
        .filter(outbox_events::aggregate_id.eq(order_id))
        .filter(outbox_events::event_type.eq("RefundRequested"))
        .select(outbox_events::event_data)
        .load::<serde_json::Value>(&mut conn)
        .await
        .expect("outbox rows")
        .into_iter()
        .map(|data| serde_json::from_value(data).expect("engine event"))
        .collect()
}

/// Reserved stock on the ledger equals the sum of active holds, and
/// nothing is negative.
pub async fn assert_ledger_consistent(db: &TestDb, lifecycle: &OrderLifecycle, product_id: Uuid) {
    let row = inventory_row(db, product_id).await;
    let active = lifecycle
        .reservations()
        .active_total(product_id)
        .await
        .expect("active total");
    assert_eq!(row.reserved_quantity, active, "reserved count drifted from active holds");
    assert!(row.available_quantity >= BigDecimal::from(0));
    assert!(row.reserved_quantity >= BigDecimal::from(0));
}

/// Totals stored on the order satisfy the pricing formula.
pub fn assert_totals_consistent(order: &Order) {
    assert!(order.totals().is_consistent(), "inconsistent totals on {}", order.order_number);
}
