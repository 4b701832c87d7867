//! Shared harness for integration tests: a full application wired against
//! a throwaway SQLite database, with seeding and request helpers.
#![allow(dead_code)]

use std::sync::Arc;

use axum::{body::Body, Router};
use chrono::Utc;
use http::{header, Method, Request, StatusCode};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::util::ServiceExt;
use uuid::Uuid;

use swiftcart_api::{
    auth::{AuthService, UserRole},
    config::AppConfig,
    db,
    entities::{coupon, customer, product, product_variant},
    events::{self, EventSender},
    gateway::{PaymentGateway, SandboxGateway},
    AppServices, AppState,
};

const TEST_JWT_SECRET: &str = "integration_test_jwt_secret_32_chars!!";
const TEST_GATEWAY_SECRET: &str = "integration_gateway_secret";

pub struct TestApp {
    pub router: Router,
    pub db: Arc<db::DbPool>,
    pub auth: Arc<AuthService>,
    gateway: Arc<SandboxGateway>,
    _db_dir: TempDir,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Like `spawn`, but lets the test adjust the config before wiring.
    pub async fn spawn_with(mutate: impl FnOnce(&mut AppConfig)) -> Self {
        let db_dir = TempDir::new().expect("create temp dir");
        let db_path = db_dir.path().join("swiftcart_test.db");
        let database_url = format!("sqlite://{}?mode=rwc", db_path.display());

        let mut config = AppConfig::for_tests(
            database_url,
            TEST_JWT_SECRET.to_string(),
            TEST_GATEWAY_SECRET.to_string(),
        );
        mutate(&mut config);

        let pool = Arc::new(
            db::establish_connection_from_app_config(&config)
                .await
                .expect("connect test database"),
        );
        db::run_migrations(&pool).await.expect("run migrations");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(SandboxGateway::new(&config.gateway));
        let auth = Arc::new(AuthService::new(&config.jwt_secret, config.jwt_expiration));

        let services = AppServices::build(
            pool.clone(),
            &config,
            event_sender,
            gateway.clone() as Arc<dyn PaymentGateway>,
        );

        let state = AppState {
            db: pool.clone(),
            config: Arc::new(config),
            services,
        };
        let router = swiftcart_api::build_router(state, auth.clone());

        Self {
            router,
            db: pool,
            auth,
            gateway,
            _db_dir: db_dir,
        }
    }

    /// Signature the sandbox gateway would attach to a captured payment.
    pub fn sign_payment(&self, gateway_order_id: &str, gateway_payment_id: &str) -> String {
        self.gateway.sign(gateway_order_id, gateway_payment_id)
    }

    pub fn token_for(&self, customer_id: Uuid) -> String {
        self.auth
            .issue_token(customer_id, UserRole::Customer)
            .expect("issue customer token")
    }

    pub fn admin_token(&self) -> String {
        self.auth
            .issue_token(Uuid::new_v4(), UserRole::Admin)
            .expect("issue admin token")
    }

    pub async fn seed_customer(&self, name: &str, email: &str) -> Uuid {
        let now = Utc::now();
        let model = customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            email: Set(email.to_string()),
            phone: Set(Some("9999999999".to_string())),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed customer");
        model.id
    }

    pub async fn seed_product(&self, name: &str) -> Uuid {
        let now = Utc::now();
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(Some(format!("{} description", name))),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed product");
        model.id
    }

    pub async fn seed_variant(
        &self,
        product_id: Uuid,
        size: &str,
        colour: &str,
        unit_price: Decimal,
        stock: i32,
    ) -> Uuid {
        let now = Utc::now();
        let model = product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            size: Set(size.to_string()),
            colour: Set(colour.to_string()),
            unit_price: Set(unit_price),
            stock: Set(stock),
            images: Set(Some(serde_json::json!(["front.jpg"]))),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed variant");
        model.id
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        amount_off: Option<Decimal>,
        percent_off: Option<Decimal>,
        min_order_amount: Option<Decimal>,
        max_order_amount: Option<Decimal>,
    ) -> Uuid {
        let now = Utc::now();
        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_uppercase()),
            is_active: Set(true),
            allowed_customer_ids: Set(None),
            min_order_amount: Set(min_order_amount),
            max_order_amount: Set(max_order_amount),
            amount_off: Set(amount_off),
            percent_off: Set(percent_off),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed coupon");
        model.id
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .expect("build request"),
            None => builder.body(Body::empty()).expect("build request"),
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("route request");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("parse response JSON")
        };

        (status, value)
    }

    pub async fn get(&self, path: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::GET, path, Some(token), None).await
    }

    pub async fn post(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, path, Some(token), Some(body))
            .await
    }

    pub async fn put(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PUT, path, Some(token), Some(body))
            .await
    }

    pub async fn delete(&self, path: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::DELETE, path, Some(token), None).await
    }
}
