/*!
 * SwiftCart API: checkout, payment settlement, and returns for a small
 * storefront.
 *
 * The settlement path is the heart of the crate: carts become pending
 * orders, orders become gateway payment intents, and a signature-verified
 * payment confirms the order and runs its side effects (stock decrements,
 * cart clearing, order history, coupon redemption).
 */

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod migrator;
pub mod services;

use std::sync::Arc;

use crate::{
    auth::AuthService,
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    gateway::PaymentGateway,
    services::{
        carts::CartService, catalog::CatalogService, checkout::CheckoutService,
        coupons::CouponService, inventory::InventoryService, orders::OrderService,
        returns::ReturnService,
    },
};

/// Service registry handed to every handler through router state.
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub carts: Arc<CartService>,
    pub coupons: Arc<CouponService>,
    pub inventory: Arc<InventoryService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub returns: Arc<ReturnService>,
}

impl AppServices {
    /// Wire the full service graph from its shared resources.
    pub fn build(
        db: Arc<DbPool>,
        config: &AppConfig,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let catalog = Arc::new(CatalogService::new(db.clone()));
        let carts = Arc::new(CartService::new(db.clone(), catalog.clone()));
        let coupons = Arc::new(CouponService::new(db.clone(), event_sender.clone()));
        let inventory = Arc::new(InventoryService::new(db.clone()));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            event_sender.clone(),
            carts.clone(),
            coupons.clone(),
            inventory.clone(),
            gateway,
            config.gateway.currency.clone(),
            config.coupon_redemption,
        ));
        let orders = Arc::new(OrderService::new(db.clone(), event_sender.clone()));
        let returns = Arc::new(ReturnService::new(
            db,
            event_sender,
            config.return_window_days,
        ));

        Self {
            catalog,
            carts,
            coupons,
            inventory,
            checkout,
            orders,
            returns,
        }
    }
}

/// Shared application state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub services: AppServices,
}

/// Assemble the application router with auth and tracing middleware.
pub fn build_router(state: AppState, auth: Arc<AuthService>) -> axum::Router {
    use std::time::Duration;
    use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

    handlers::api_routes(state)
        .layer(axum::Extension(auth))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}
