//! HTTP API server for the inventory reservation and order fulfillment engine.
//!
//! Provides REST endpoints for carts, checkout, the payment webhook and
//! order administration, with structured logging (tracing) and Prometheus
//! metrics.

pub mod config;
pub mod error;
pub mod retry;
pub mod routes;
pub mod seed;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use common::Clock;
use fulfillment::{
    CartManager, CheckoutOrchestrator, InMemoryPaymentGateway, InventoryLedger, LogNotifier,
    OrderFulfillment, ReservationSweeper, WebhookVerifier,
};
use metrics_exporter_prometheus::PrometheusHandle;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use retry::RetryPolicy;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Store> {
    pub store: S,
    pub ledger: InventoryLedger<S>,
    pub cart: CartManager<S>,
    pub checkout: CheckoutOrchestrator<S, InMemoryPaymentGateway>,
    pub orders: OrderFulfillment<S, LogNotifier>,
    pub gateway: InMemoryPaymentGateway,
    /// Verifies webhook signatures; `None` accepts unsigned deliveries.
    pub webhook: Option<WebhookVerifier>,
    pub clock: Arc<dyn Clock>,
    pub retry: RetryPolicy,
    sweeper: ReservationSweeper<S>,
}

impl<S: Store> AppState<S> {
    /// A sweeper over the same store and clock as the handlers.
    pub fn sweeper(&self) -> ReservationSweeper<S> {
        self.sweeper.clone()
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/users/{user_id}/cart",
            post(routes::cart::add::<S>).get(routes::cart::list::<S>),
        )
        .route("/users/{user_id}/cart/count", get(routes::cart::count::<S>))
        .route(
            "/users/{user_id}/cart/{cart_item_id}",
            get(routes::cart::get::<S>)
                .put(routes::cart::modify::<S>)
                .delete(routes::cart::remove::<S>),
        )
        .route(
            "/users/{user_id}/orders",
            get(routes::orders::list_for_user::<S>),
        )
        .route("/checkout", post(routes::checkout::begin::<S>))
        .route("/webhooks/payment", post(routes::webhook::receive::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route("/products/{id}/stock", get(routes::products::stock::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state with the in-memory payment provider and
/// log-only notifications.
pub fn create_default_state<S: Store>(
    store: S,
    clock: Arc<dyn Clock>,
    config: &Config,
) -> Arc<AppState<S>> {
    let gateway = InMemoryPaymentGateway::new();
    let webhook = config
        .webhook_secret
        .as_ref()
        .map(|secret| WebhookVerifier::new(secret, config.webhook_tolerance()));

    Arc::new(AppState {
        ledger: InventoryLedger::new(store.clone()),
        cart: CartManager::new(store.clone(), Arc::clone(&clock), config.hold_window()),
        checkout: CheckoutOrchestrator::new(
            store.clone(),
            gateway.clone(),
            config.checkout_urls(),
        ),
        orders: OrderFulfillment::new(store.clone(), LogNotifier, Arc::clone(&clock)),
        sweeper: ReservationSweeper::new(store.clone(), Arc::clone(&clock), config.sweeper()),
        gateway,
        webhook,
        clock,
        retry: RetryPolicy::new(config.conflict_retry_attempts),
        store,
    })
}
