//! REST API server for MyCoin
//!
//! Exposes wallet management, transfers, transaction queries and mining
//! control over HTTP. Every response uses the `{ success, message, data }`
//! envelope.

use axum::{
    extract::{Path, Query, Request, State},
    http::{self, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::amount;
use crate::blockchain::LedgerEngine;
use crate::error::ChainError;
use crate::node::NodeState;
use crate::transfer::TransferEngine;
use crate::wallet::WalletService;

/// Shared handler state
#[derive(Clone)]
pub struct Node {
    pub wallets: Arc<WalletService>,
    pub transfers: Arc<TransferEngine>,
    pub ledger: Arc<LedgerEngine>,
    pub state: Option<Arc<RwLock<NodeState>>>,
    api_stats: Arc<RwLock<ApiStats>>,
}

#[derive(Debug, Default)]
struct ApiStats {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    start_time: Option<Instant>,
}

impl ApiStats {
    fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Self::default()
        }
    }

    fn record_request(&mut self, success: bool) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
    }
}

impl Node {
    pub fn new(
        wallets: Arc<WalletService>,
        transfers: Arc<TransferEngine>,
        ledger: Arc<LedgerEngine>,
        state: Option<Arc<RwLock<NodeState>>>,
    ) -> Self {
        Node {
            wallets,
            transfers,
            ledger,
            state,
            api_stats: Arc::new(RwLock::new(ApiStats::new())),
        }
    }

    pub async fn get_stats(&self) -> ApiStatsResponse {
        let stats = self.api_stats.read().await;
        let uptime = stats.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0);

        ApiStatsResponse {
            total_requests: stats.total_requests,
            successful_requests: stats.successful_requests,
            failed_requests: stats.failed_requests,
            uptime_seconds: uptime,
            blocks_mined: self.ledger.blocks_mined(),
            is_mining: self.ledger.is_mining(),
        }
    }
}

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Chain(ChainError),
    InvalidInput(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Chain(e) => match e {
                ChainError::WalletNotFound(..) => StatusCode::NOT_FOUND,
                ChainError::InvalidSignature => StatusCode::UNAUTHORIZED,
                ChainError::WalletExists(_)
                | ChainError::DuplicateTransactionHash(_)
                | ChainError::InvalidBlock(_)
                | ChainError::SearchCancelled => StatusCode::CONFLICT,
                ChainError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                ChainError::TaskFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
                ChainError::InsufficientFunds { .. }
                | ChainError::InvalidKey(_)
                | ChainError::InvalidSignatureEncoding(_)
                | ChainError::MiningNotConfigured
                | ChainError::InvalidDifficulty(_)
                | ChainError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Chain(e) => e.to_string(),
            ApiError::InvalidInput(msg) => msg,
        };

        (
            status,
            Json(ApiResponse::<()> {
                success: false,
                message: Some(message),
                data: None,
            }),
        )
            .into_response()
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError::Chain(err)
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    fn data(data: T) -> Json<Self> {
        Json(ApiResponse {
            success: true,
            message: None,
            data: Some(data),
        })
    }

    fn with_message(message: &str, data: T) -> Json<Self> {
        Json(ApiResponse {
            success: true,
            message: Some(message.to_string()),
            data: Some(data),
        })
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Serialize)]
pub struct ApiStatsResponse {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub uptime_seconds: u64,
    pub blocks_mined: u64,
    pub is_mining: bool,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateWalletRequest {
    pub user_id: Option<String>,
    pub passphrase: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePhraseRequest {
    pub word_count: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreWalletRequest {
    pub user_id: Option<String>,
    pub mnemonic: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub from_address: String,
    pub to_address: String,
    pub amount: f64,
    pub private_key: String,
}

#[derive(Deserialize)]
pub struct MiningAddressRequest {
    pub address: String,
}

#[derive(Deserialize)]
pub struct DifficultyRequest {
    pub difficulty: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MineBlockRequest {
    pub miner_address: Option<String>,
}

#[derive(Deserialize)]
struct PaginationQuery {
    #[serde(default = "default_page")]
    page: u64,
    #[serde(default = "default_limit")]
    limit: u64,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    10
}

const DEFAULT_WORD_COUNT: usize = 12;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChainValidity {
    valid: bool,
    height: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SentTransaction {
    hash: String,
    from_address: Option<String>,
    to_address: String,
    #[serde(with = "amount::as_decimal_str")]
    amount: amount::Amount,
    timestamp: i64,
    status: crate::transaction::TxStatus,
}

// ============================================================================
// Middleware
// ============================================================================

/// Request statistics middleware
async fn stats_middleware(State(node): State<Arc<Node>>, req: Request, next: Next) -> Response {
    let response = next.run(req).await;

    let success = response.status().is_success();
    node.api_stats.write().await.record_request(success);

    response
}

/// Logs method, path, status, duration and current `NodeState` (when
/// available).
async fn logging_middleware(
    State(node): State<Arc<Node>>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let duration = start.elapsed();
    let status = response.status();

    let node_state = if let Some(s) = &node.state {
        format!("{:?}", s.read().await.clone())
    } else {
        "unknown".to_string()
    };

    tracing::info!(
        method = %method,
        path = %path,
        status = %status.as_u16(),
        duration_ms = %duration.as_millis(),
        node_state = %node_state,
        "api.request"
    );

    response
}

// ============================================================================
// API Server
// ============================================================================

/// Build the API router with all endpoints
pub fn build_api_router(node: Arc<Node>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![http::header::CONTENT_TYPE])
        .allow_credentials(true);

    let api_routes = Router::new()
        // Wallet endpoints
        .route("/wallets", post(create_wallet))
        .route("/wallets/:address/stats", get(get_wallet_stats))
        .route("/wallets/generate-phrase", post(generate_phrase))
        .route("/wallets/restore", post(restore_wallet))
        // Transaction endpoints
        .route("/transactions/send", post(send_coins))
        .route("/transactions/:address/history", get(get_history))
        .route("/transactions/blockchain", get(get_all_transactions))
        // Mining endpoints
        .route("/mining/address", post(set_mining_address))
        .route("/mining/status", get(get_mining_status))
        .route("/mining/difficulty", post(set_difficulty))
        .route("/mining/start", post(start_mining))
        .route("/mining/stop", post(stop_mining))
        .route("/mining/mine-block", post(mine_block))
        // Chain endpoints
        .route("/blockchain/blocks", get(get_blocks))
        .route("/blockchain/validate", get(validate_chain))
        // System endpoints
        .route("/health", get(health_check))
        .route("/stats", get(get_api_stats))
        .layer(middleware::from_fn_with_state(node.clone(), logging_middleware))
        .layer(middleware::from_fn_with_state(node.clone(), stats_middleware))
        .with_state(node);

    Router::new().nest("/api", api_routes).layer(cors)
}

/// Serves the API on `0.0.0.0:port` until `shutdown` resolves.
pub async fn run_api_server(
    node: Arc<Node>,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_api_router(node);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(%addr, "api.listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn health_check(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let height = node.ledger.height().await;
    let state = match &node.state {
        Some(s) => Some(s.read().await.clone()),
        None => None,
    };

    let (status, healthy) = match &state {
        None | Some(NodeState::Ready) => (StatusCode::OK, true),
        Some(NodeState::Degraded) => (StatusCode::OK, true),
        Some(_) => (StatusCode::SERVICE_UNAVAILABLE, false),
    };

    (
        status,
        Json(ApiResponse {
            success: healthy,
            message: None,
            data: Some(serde_json::json!({
                "status": if healthy { "healthy" } else { "unhealthy" },
                "nodeState": state.map(|s| format!("{:?}", s)),
                "height": height,
                "timestamp": chrono::Utc::now().to_rfc3339()
            })),
        }),
    )
}

async fn get_api_stats(State(node): State<Arc<Node>>) -> ApiResult<ApiStatsResponse> {
    Ok(ApiResponse::data(node.get_stats().await))
}

async fn create_wallet(
    State(node): State<Arc<Node>>,
    body: Option<Json<CreateWalletRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body.unwrap_or_default();
    let created = node.wallets.create_wallet(req.user_id, req.passphrase)?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::with_message("Wallet created successfully", created),
    ))
}

async fn get_wallet_stats(
    State(node): State<Arc<Node>>,
    Path(address): Path<String>,
) -> ApiResult<crate::wallet::WalletStats> {
    Ok(ApiResponse::data(node.wallets.wallet_stats(&address)?))
}

async fn generate_phrase(
    State(node): State<Arc<Node>>,
    body: Option<Json<GeneratePhraseRequest>>,
) -> ApiResult<crate::wallet::RecoveryPhrase> {
    let Json(req) = body.unwrap_or_default();
    let word_count = req.word_count.unwrap_or(DEFAULT_WORD_COUNT);
    Ok(ApiResponse::with_message(
        "Recovery phrase generated. Store it somewhere safe.",
        node.wallets.generate_recovery_phrase(word_count)?,
    ))
}

async fn restore_wallet(
    State(node): State<Arc<Node>>,
    Json(req): Json<RestoreWalletRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.mnemonic.trim().is_empty() {
        return Err(ApiError::InvalidInput("Recovery phrase is required".to_string()));
    }
    let restored = node.wallets.restore_wallet(req.user_id, &req.mnemonic)?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::with_message("Wallet restored successfully", restored),
    ))
}

async fn send_coins(
    State(node): State<Arc<Node>>,
    Json(req): Json<SendRequest>,
) -> ApiResult<SentTransaction> {
    if req.from_address.is_empty() || req.to_address.is_empty() || req.private_key.is_empty() {
        return Err(ApiError::InvalidInput(
            "fromAddress, toAddress, amount and privateKey are required".to_string(),
        ));
    }
    let amount = amount::parse_positive(req.amount)?;
    let record = node
        .transfers
        .transfer(&req.from_address, &req.to_address, amount, &req.private_key)
        .await?;

    Ok(ApiResponse::with_message(
        "Transaction completed successfully",
        SentTransaction {
            hash: record.hash,
            from_address: record.from_address,
            to_address: record.to_address,
            amount: record.amount,
            timestamp: record.timestamp,
            status: record.status,
        },
    ))
}

async fn get_history(
    State(node): State<Arc<Node>>,
    Path(address): Path<String>,
) -> ApiResult<Vec<crate::transaction::HistoryEntry>> {
    let history = node.transfers.history(&address)?.collect();
    Ok(ApiResponse::data(history))
}

async fn get_all_transactions(
    State(node): State<Arc<Node>>,
    Query(params): Query<PaginationQuery>,
) -> ApiResult<crate::transaction::TransactionPage> {
    Ok(ApiResponse::data(
        node.transfers.transactions_page(params.page, params.limit)?,
    ))
}

async fn set_mining_address(
    State(node): State<Arc<Node>>,
    Json(req): Json<MiningAddressRequest>,
) -> ApiResult<serde_json::Value> {
    if req.address.is_empty() {
        return Err(ApiError::InvalidInput("Mining address is required".to_string()));
    }
    node.ledger.set_mining_address(&req.address)?;
    Ok(ApiResponse::with_message(
        "Mining address set successfully",
        serde_json::json!({ "address": req.address }),
    ))
}

async fn get_mining_status(
    State(node): State<Arc<Node>>,
) -> ApiResult<crate::blockchain::MiningStatus> {
    Ok(ApiResponse::data(node.ledger.status().await))
}

async fn set_difficulty(
    State(node): State<Arc<Node>>,
    Json(req): Json<DifficultyRequest>,
) -> ApiResult<serde_json::Value> {
    let difficulty = node.ledger.set_difficulty(req.difficulty)?;
    Ok(ApiResponse::with_message(
        "Mining difficulty updated",
        serde_json::json!({ "difficulty": difficulty }),
    ))
}

async fn start_mining(
    State(node): State<Arc<Node>>,
) -> ApiResult<crate::blockchain::MiningStatus> {
    node.ledger.start()?;
    Ok(ApiResponse::with_message(
        "Mining started",
        node.ledger.status().await,
    ))
}

async fn stop_mining(
    State(node): State<Arc<Node>>,
) -> ApiResult<crate::blockchain::MiningStatus> {
    node.ledger.stop().await?;
    Ok(ApiResponse::with_message(
        "Mining stopped",
        node.ledger.status().await,
    ))
}

async fn mine_block(
    State(node): State<Arc<Node>>,
    body: Option<Json<MineBlockRequest>>,
) -> ApiResult<crate::blockchain::Block> {
    let requested = body.and_then(|Json(req)| req.miner_address);
    let miner = requested
        .or_else(|| node.ledger.mining_address())
        .ok_or(ChainError::MiningNotConfigured)?;

    let block = node.ledger.mine_block(&miner).await?;
    Ok(ApiResponse::with_message("Block mined successfully", block))
}

async fn get_blocks(State(node): State<Arc<Node>>) -> ApiResult<Vec<crate::blockchain::Block>> {
    Ok(ApiResponse::data(node.ledger.blocks().await))
}

async fn validate_chain(State(node): State<Arc<Node>>) -> ApiResult<ChainValidity> {
    let height = node.ledger.height().await;
    let validity = match node.ledger.validate_chain().await {
        Ok(()) => ChainValidity {
            valid: true,
            height,
            error: None,
        },
        Err(e) => ChainValidity {
            valid: false,
            height,
            error: Some(e.to_string()),
        },
    };
    Ok(ApiResponse::data(validity))
}
