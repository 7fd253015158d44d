//! HTTP front-end for the ledger.
//!
//! Handlers only translate between JSON and [`SharedLedger`] calls; mining
//! runs on the blocking pool and is cancelled if the request goes away or
//! the node shuts down.

pub mod config;
pub mod constants;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ledger_core::{Block, CancelToken, ChainValidity, LedgerError, SharedLedger, Transaction};
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::constants::REQUIRED_TX_FIELDS;

#[derive(Clone)]
pub struct AppState {
    pub ledger: SharedLedger,
    /// Fired once when the node stops; every running search watches it.
    pub shutdown: CancelToken,
}

impl AppState {
    pub fn new(ledger: SharedLedger) -> Self {
        Self {
            ledger,
            shutdown: CancelToken::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing fields")]
    MissingFields(Vec<&'static str>),

    #[error("invalid request body: {message}")]
    BadBody { status: StatusCode, message: String },

    #[error("field `{0}` has the wrong type")]
    InvalidField(&'static str),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("mining worker failed: {0}")]
    Worker(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingFields(_) | ApiError::InvalidField(_) => StatusCode::BAD_REQUEST,
            ApiError::BadBody { status, .. } => *status,
            ApiError::Ledger(LedgerError::EmptyPool) => StatusCode::BAD_REQUEST,
            ApiError::Ledger(LedgerError::MiningAborted(_))
            | ApiError::Ledger(LedgerError::NotInitialized) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Ledger(LedgerError::LinkageMismatch { .. })
            | ApiError::Ledger(LedgerError::IndexMismatch { .. })
            | ApiError::Ledger(LedgerError::InvalidProof { .. })
            | ApiError::Ledger(LedgerError::InvalidChain { .. })
            | ApiError::Ledger(LedgerError::AlreadyInitialized) => StatusCode::CONFLICT,
            ApiError::Ledger(LedgerError::Config(_)) | ApiError::Worker(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let mut body = json!({ "error": self.to_string() });
        if let ApiError::MissingFields(fields) = &self {
            body["fields"] = json!(fields);
        }
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadBody {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

/// Pull a transaction out of a loosely typed JSON body, listing every
/// absent field rather than stopping at the first.
pub fn parse_transaction(body: &Value) -> Result<Transaction, ApiError> {
    let missing: Vec<&'static str> = REQUIRED_TX_FIELDS
        .into_iter()
        .filter(|field| body.get(*field).map_or(true, Value::is_null))
        .collect();
    if !missing.is_empty() {
        return Err(ApiError::MissingFields(missing));
    }
    let sender = body["sender"]
        .as_str()
        .ok_or(ApiError::InvalidField("sender"))?;
    let recipient = body["recipient"]
        .as_str()
        .ok_or(ApiError::InvalidField("recipient"))?;
    let amount = body["amount"]
        .as_f64()
        .ok_or(ApiError::InvalidField("amount"))?;
    Ok(Transaction::new(sender, recipient, amount))
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize)]
struct TxAccepted {
    message: String,
    index: u64,
}

#[derive(Serialize)]
struct MinedBlock {
    message: &'static str,
    #[serde(flatten)]
    block: Block,
}

#[derive(Serialize)]
struct ChainView {
    chain: Vec<Block>,
    length: usize,
}

#[derive(Serialize)]
struct PendingView {
    transactions: Vec<Transaction>,
    length: usize,
}

#[derive(Serialize)]
struct ValidityView {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    invalid_at: Option<u64>,
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn new_transaction(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<TxAccepted>), ApiError> {
    let Json(body) = body?;
    let tx = parse_transaction(&body)?;
    let index = state.ledger.submit_transaction(tx);
    Ok((
        StatusCode::CREATED,
        Json(TxAccepted {
            message: format!("Transaction will be added to Block {index}"),
            index,
        }),
    ))
}

async fn mine(State(state): State<AppState>) -> Result<Json<MinedBlock>, ApiError> {
    let cancel = CancelToken::new();
    // Dropping this future (client hung up) stops the search.
    let _guard = cancel.drop_guard();
    let tokens = [cancel, state.shutdown.clone()];
    let ledger = state.ledger.clone();
    let block = tokio::task::spawn_blocking(move || ledger.mine_pending_cancelable(tokens))
        .await
        .map_err(|e| ApiError::Worker(e.to_string()))??;
    Ok(Json(MinedBlock {
        message: "New Block Forged",
        block,
    }))
}

async fn chain(State(state): State<AppState>) -> Json<ChainView> {
    let chain = state.ledger.get_chain();
    Json(ChainView {
        length: chain.len(),
        chain,
    })
}

async fn validate(State(state): State<AppState>) -> Json<ValidityView> {
    let view = match state.ledger.validate_chain() {
        ChainValidity::Valid => ValidityView {
            valid: true,
            invalid_at: None,
        },
        ChainValidity::InvalidAt(index) => ValidityView {
            valid: false,
            invalid_at: Some(index),
        },
    };
    Json(view)
}

async fn pending(State(state): State<AppState>) -> Json<PendingView> {
    let transactions = state.ledger.pending_transactions();
    Json(PendingView {
        length: transactions.len(),
        transactions,
    })
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/transactions/new", post(new_transaction))
        .route("/mine", get(mine).post(mine))
        .route("/chain", get(chain))
        .route("/chain/validate", get(validate))
        .route("/pending", get(pending))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `signal` resolves, then cancel in-flight mining and drain.
pub async fn run(
    listener: TcpListener,
    state: AppState,
    signal: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            signal.await;
            info!("stopping searches");
            shutdown.cancel();
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_transaction_accepts_complete_body() {
        let tx = parse_transaction(&json!({"sender": "A", "recipient": "B", "amount": 10})).unwrap();
        assert_eq!(tx, Transaction::new("A", "B", 10.0));
    }

    #[test]
    fn parse_transaction_lists_every_missing_field() {
        match parse_transaction(&json!({"recipient": "B"})) {
            Err(ApiError::MissingFields(fields)) => assert_eq!(fields, vec!["sender", "amount"]),
            other => panic!("expected missing fields, got {other:?}"),
        }
    }

    #[test]
    fn null_counts_as_missing() {
        assert!(matches!(
            parse_transaction(&json!({"sender": null, "recipient": "B", "amount": 1})),
            Err(ApiError::MissingFields(_))
        ));
    }

    #[test]
    fn wrong_type_is_reported() {
        assert!(matches!(
            parse_transaction(&json!({"sender": "A", "recipient": "B", "amount": "lots"})),
            Err(ApiError::InvalidField("amount"))
        ));
    }

    #[test]
    fn negative_amounts_pass_through() {
        let tx = parse_transaction(&json!({"sender": "A", "recipient": "B", "amount": -2.5})).unwrap();
        assert_eq!(tx.amount, -2.5);
    }

    #[test]
    fn missing_fields_body_lists_fields() {
        let err = ApiError::MissingFields(vec!["recipient", "amount"]);
        assert_eq!(err.to_string(), "missing fields");
        let res = err.into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn error_statuses() {
        assert_eq!(ApiError::MissingFields(vec!["sender"]).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::from(LedgerError::EmptyPool).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(LedgerError::MiningAborted(ledger_core::AbortReason::DeadlineExceeded))
                .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(LedgerError::IndexMismatch { expected: 1, found: 2 }).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::BadBody {
                status: StatusCode::UNSUPPORTED_MEDIA_TYPE,
                message: String::new(),
            }
            .status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
    }
}
