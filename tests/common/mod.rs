//! In-process stand-in for the coupon and product services.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Debug)]
pub struct StubState {
    /// Status answered by the issue endpoint; 200 means QUEUED.
    pub issue_status: AtomicU16,
    pub health_status: AtomicU16,
    pub stock: AtomicI64,
    pub issue_calls: AtomicU64,
    pub product_calls: AtomicU64,
}

pub struct Stub {
    pub base_url: String,
    pub state: Arc<StubState>,
}

impl Stub {
    pub fn issue_calls(&self) -> u64 {
        self.state.issue_calls.load(Ordering::SeqCst)
    }

    pub fn product_calls(&self) -> u64 {
        self.state.product_calls.load(Ordering::SeqCst)
    }
}

async fn issue(State(state): State<Arc<StubState>>, Path(_id): Path<u64>) -> (StatusCode, Json<Value>) {
    state.issue_calls.fetch_add(1, Ordering::SeqCst);
    let status = state.issue_status.load(Ordering::SeqCst);
    if status == 200 {
        state.stock.fetch_sub(1, Ordering::SeqCst);
        return (StatusCode::OK, Json(json!({ "status": "QUEUED" })));
    }
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, Json(json!({ "status": "REJECTED" })))
}

async fn coupon(State(state): State<Arc<StubState>>, Path(id): Path<u64>) -> Json<Value> {
    Json(json!({ "id": id, "quantity": state.stock.load(Ordering::SeqCst) }))
}

async fn product(State(state): State<Arc<StubState>>, Path(id): Path<u64>) -> Json<Value> {
    state.product_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "id": id, "name": format!("product-{}", id) }))
}

async fn health(State(state): State<Arc<StubState>>) -> StatusCode {
    StatusCode::from_u16(state.health_status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Serve the stub on an ephemeral port for the rest of the test.
pub async fn spawn_stub(issue_status: u16, health_status: u16, stock: i64) -> Stub {
    let state = Arc::new(StubState {
        issue_status: AtomicU16::new(issue_status),
        health_status: AtomicU16::new(health_status),
        stock: AtomicI64::new(stock),
        issue_calls: AtomicU64::new(0),
        product_calls: AtomicU64::new(0),
    });

    let app = Router::new()
        .route("/coupons/:id/issue", post(issue))
        .route("/api/coupons/:id", get(coupon))
        .route("/products/:id", get(product))
        .route("/actuator/health", get(health))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Stub {
        base_url: format!("http://{}", addr),
        state,
    }
}
