//! Shared test helpers for integration tests.
//!
//! Database-backed tests need `TEST_DATABASE_URL`. Each [`TestEnv`] holds a
//! process-wide lock for its lifetime, so tables can be truncated between
//! tests without one test wiping rows another is still using.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use praktis_escrow::api::middleware_auth::Claims;
use praktis_escrow::config::EngineConfig;
use praktis_escrow::db::{Database, Engagement};
use praktis_escrow::engine::{Actor, Engine, Role};
use praktis_escrow::error::{EngineError, EngineResult};
use praktis_escrow::gateway::{
    notification_signature, verify_signature, ChargeRequest, ChargeSession, GatewayNotification,
    PaymentGateway,
};
use praktis_escrow::messaging::{DbMessenger, Messenger};
use praktis_escrow::project::ProjectDraft;
use praktis_escrow::prom_metrics::Metrics;
use praktis_escrow::proposal::{MilestoneDescriptor, ProposalDraft};
use praktis_escrow::withdrawal::PayoutDetails;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use uuid::Uuid;

pub const SERVER_KEY: &str = "SB-Mid-server-test-key";
pub const JWT_SECRET: &str = "integration-jwt-secret";
pub const CRON_SECRET: &str = "integration-cron-secret";

static DB_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Returns the test database URL from the `TEST_DATABASE_URL` environment variable.
/// Panics if the variable is not set.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set for integration tests")
}

/// Returns true if the test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

/// A fixed instant so time-dependent assertions never drift.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub fn days(n: i64) -> Duration {
    Duration::days(n)
}

// ── Gateway double ──────────────────────────────────────────────

/// Records charge requests and verifies notifications with [`SERVER_KEY`].
#[derive(Default)]
pub struct MockGateway {
    pub requests: Mutex<Vec<ChargeRequest>>,
    pub fail_charges: AtomicBool,
}

impl MockGateway {
    pub fn charge_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_charges.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_charge(&self, request: &ChargeRequest) -> EngineResult<ChargeSession> {
        if self.fail_charges.load(Ordering::SeqCst) {
            return Err(EngineError::ExternalServiceFailure(
                "snap returned 503".into(),
            ));
        }
        self.requests.lock().unwrap().push(request.clone());
        Ok(ChargeSession {
            token: format!("snap-{}", request.order_ref),
            redirect_url: format!("https://pay.test/{}", request.order_ref),
        })
    }

    fn verify_notification(&self, notification: &GatewayNotification) -> bool {
        verify_signature(notification, SERVER_KEY)
    }
}

/// A signed notification as the gateway would send it.
pub fn notification(order_id: &str, transaction_status: &str, gross: i64) -> GatewayNotification {
    let status_code = match transaction_status {
        "settlement" | "capture" => "200",
        "pending" => "201",
        _ => "202",
    };
    let gross_amount = format!("{}.00", gross);
    GatewayNotification {
        order_id: order_id.to_string(),
        status_code: status_code.to_string(),
        signature_key: notification_signature(order_id, status_code, &gross_amount, SERVER_KEY),
        gross_amount,
        transaction_status: transaction_status.to_string(),
        fraud_status: None,
        payment_type: Some("bank_transfer".into()),
        transaction_id: Some(Uuid::new_v4().to_string()),
    }
}

// ── Messenger double ────────────────────────────────────────────

/// Fails every call; used to show messaging never undoes a settlement.
pub struct FailingMessenger;

#[async_trait]
impl Messenger for FailingMessenger {
    async fn ensure_conversation(&self, _project_id: Uuid, _participants: &[Uuid]) -> EngineResult<Uuid> {
        Err(EngineError::ExternalServiceFailure("chat service down".into()))
    }

    async fn post_system_message(&self, _conversation_id: Uuid, _text: &str) -> EngineResult<()> {
        Err(EngineError::ExternalServiceFailure("chat service down".into()))
    }
}

// ── Environment ─────────────────────────────────────────────────

pub struct TestEnv {
    pub engine: Arc<Engine>,
    pub gateway: Arc<MockGateway>,
    pub db: Database,
    _guard: MutexGuard<'static, ()>,
}

/// Connect, migrate and truncate. The returned env keeps the DB lock.
pub async fn setup() -> TestEnv {
    setup_with(EngineConfig::default(), None).await
}

pub async fn setup_with(config: EngineConfig, messenger: Option<Arc<dyn Messenger>>) -> TestEnv {
    let guard = DB_LOCK.lock().await;
    let db = Database::connect(&test_db_url(), 5)
        .await
        .expect("Failed to connect to test database");
    db.migrate().await.expect("migrations failed");
    truncate_all_tables(db.pool()).await;

    let gateway = Arc::new(MockGateway::default());
    let messenger: Arc<dyn Messenger> = match messenger {
        Some(m) => m,
        None => Arc::new(DbMessenger::new(db.clone())),
    };
    let engine = Engine::new(
        db.clone(),
        gateway.clone(),
        messenger,
        config,
        Arc::new(Metrics::new()),
    );
    TestEnv {
        engine: Arc::new(engine),
        gateway,
        db,
        _guard: guard,
    }
}

/// Truncate all tables to ensure test isolation.
pub async fn truncate_all_tables(pool: &sqlx::PgPool) {
    sqlx::raw_sql(
        "TRUNCATE TABLE messages, conversation_participants, conversations,
                       withdrawals, escrow_order_refs, escrow_transactions,
                       milestones, proposals, projects, analyst_profiles
         CASCADE",
    )
    .execute(pool)
    .await
    .unwrap();
}

// ── Actors and fixtures ─────────────────────────────────────────

pub fn client() -> Actor {
    let mut a = Actor::new(Uuid::new_v4(), Role::Client);
    a.name = Some("Budi Santoso".into());
    a.email = Some("budi@example.com".into());
    a
}

pub fn analyst() -> Actor {
    Actor::new(Uuid::new_v4(), Role::Analyst)
}

pub fn admin() -> Actor {
    Actor::new(Uuid::new_v4(), Role::Admin)
}

pub fn project_draft() -> ProjectDraft {
    ProjectDraft {
        title: "Retail demand forecast".into(),
        description: "Weekly SKU-level forecast for 40 stores".into(),
        budget_min: 1_000_000,
        budget_max: 5_000_000,
        deadline: None,
        publish: true,
    }
}

pub fn proposal_draft(amounts: &[i64]) -> ProposalDraft {
    ProposalDraft {
        cover_letter: "Six years of retail analytics with Python, SQL and Prophet forecasting."
            .into(),
        proposed_budget: amounts.iter().sum(),
        proposed_days: 21,
        milestones: amounts
            .iter()
            .enumerate()
            .map(|(i, &amount)| MilestoneDescriptor {
                title: format!("Milestone {}", i + 1),
                description: format!("Deliverable number {}", i + 1),
                amount,
                due_date: None,
            })
            .collect(),
    }
}

pub fn bank_details() -> PayoutDetails {
    PayoutDetails {
        bank_name: Some("BCA".into()),
        account_number: Some("1234567890".into()),
        account_name: Some("Sari Wulandari".into()),
    }
}

/// An accepted engagement: client, hired analyst and the formed milestones.
pub struct Hired {
    pub client: Actor,
    pub analyst: Actor,
    pub engagement: Engagement,
}

impl Hired {
    pub fn project_id(&self) -> Uuid {
        self.engagement.project.id
    }

    pub fn milestone(&self, index: usize) -> Uuid {
        self.engagement.milestones[index].id
    }
}

pub async fn hire(engine: &Engine, amounts: &[i64]) -> Hired {
    let client = client();
    let analyst = analyst();
    let project = engine.create_project(&client, &project_draft()).await.unwrap();
    let proposal = engine
        .submit_proposal(&analyst, project.id, &proposal_draft(amounts))
        .await
        .unwrap();
    let engagement = engine
        .accept_proposal(&client, project.id, proposal.id, t0())
        .await
        .unwrap();
    Hired {
        client,
        analyst,
        engagement,
    }
}

/// Open a charge for a milestone and deliver a settlement notification for it.
pub async fn fund(engine: &Engine, client: &Actor, milestone_id: Uuid, at: DateTime<Utc>) -> String {
    let session = engine.initiate_payment(client, milestone_id, at).await.unwrap();
    engine
        .handle_notification(
            &notification(&session.order_ref, "settlement", session.gross_amount),
            at,
        )
        .await
        .unwrap();
    session.order_ref
}

// ── Tokens ──────────────────────────────────────────────────────

pub fn token_for(actor: &Actor) -> String {
    let claims = Claims {
        sub: actor.user_id,
        role: actor.role,
        name: actor.name.clone(),
        email: actor.email.clone(),
        exp: (Utc::now().timestamp() + 3600) as u64,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

// ── HTTP ────────────────────────────────────────────────────────

/// Router over an engine whose pool never connects. Enough for routes that
/// reject before touching storage.
pub fn offline_router(cron_secret: Option<&str>) -> axum::Router {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_millis(500))
        .connect_lazy("postgres://praktis@127.0.0.1:1/unreachable")
        .unwrap();
    let engine = Engine::new(
        Database::from_pool(pool.clone()),
        Arc::new(MockGateway::default()),
        Arc::new(DbMessenger::new(Database::from_pool(pool))),
        EngineConfig::default(),
        Arc::new(Metrics::new()),
    );
    let state = praktis_escrow::api::AppState::new(
        Arc::new(engine),
        JWT_SECRET.to_string(),
        cron_secret.map(str::to_string),
    );
    praktis_escrow::api::build_router(state)
}

pub fn router_for(env: &TestEnv) -> axum::Router {
    let state = praktis_escrow::api::AppState::new(
        Arc::clone(&env.engine),
        JWT_SECRET.to_string(),
        Some(CRON_SECRET.to_string()),
    );
    praktis_escrow::api::build_router(state)
}
