//! HTTP facade
//!
//! JSON API for address management, balance queries, outbound transfers,
//! and notification draining. Every response is wrapped in a
//! `{"result": "success"|"failure", "response": ...}` envelope; failures
//! carry `{"error": message}`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::Config;
use crate::keys;
use crate::store::Store;
use crate::wallet;

/// Shared state for the API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Store,
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/createAddress", post(create_address))
        .route("/registerAddress", post(register_address))
        .route("/getBalance", get(get_balance))
        .route("/sendEth", post(send_eth))
        .route("/sendErc20", post(send_erc20))
        .route("/getNotifications", get(get_notifications))
        .fallback(not_found)
        .with_state(state)
}

/// Wrap a payload in the response envelope.
fn envelope(code: StatusCode, payload: Value) -> Value {
    let result = if code.is_success() { "success" } else { "failure" };
    json!({ "result": result, "response": payload })
}

fn respond(code: StatusCode, payload: Value) -> Response {
    (code, Json(envelope(code, payload))).into_response()
}

fn respond_error(code: StatusCode, message: impl Into<String>) -> Response {
    respond(code, json!({ "error": message.into() }))
}

#[derive(Deserialize)]
struct CreateAddressQuery {
    with_private: Option<String>,
}

async fn create_address(
    State(state): State<AppState>,
    Query(query): Query<CreateAddressQuery>,
) -> Response {
    let (address, private) = keys::generate();

    if let Err(e) = state.store.insert_key(&address, &private).await {
        return respond_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Could not save newly created key: {:#}", e),
        );
    }

    info!("Created address: {}", address);

    if query.with_private.as_deref() == Some("true") {
        respond(
            StatusCode::OK,
            json!({ "address": address, "private": private }),
        )
    } else {
        respond(StatusCode::OK, json!({ "address": address }))
    }
}

#[derive(Deserialize)]
struct RegisterAddressForm {
    address: Option<String>,
    private: Option<String>,
}

async fn register_address(
    State(state): State<AppState>,
    Form(form): Form<RegisterAddressForm>,
) -> Response {
    let Some(address) = form.address.filter(|a| !a.is_empty()) else {
        return respond_error(StatusCode::BAD_REQUEST, "Missing 'address' field");
    };
    let Some(private) = form.private.filter(|p| !p.is_empty()) else {
        return respond_error(StatusCode::BAD_REQUEST, "Missing 'private' field");
    };

    if !keys::is_address(&address) {
        return respond_error(StatusCode::BAD_REQUEST, "Invalid 'address' field");
    }

    // The submitted address must re-derive from the submitted key.
    let derived = match keys::derive_address(&private) {
        Ok(derived) => derived,
        Err(e) => {
            return respond_error(
                StatusCode::BAD_REQUEST,
                format!("Invalid private key: {:#}", e),
            )
        }
    };
    let canonical = address
        .strip_prefix("0x")
        .unwrap_or(&address)
        .to_lowercase();
    if derived != canonical {
        return respond_error(
            StatusCode::BAD_REQUEST,
            "Address does not match the private key",
        );
    }

    if let Err(e) = state.store.insert_key(&derived, &private).await {
        return respond_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Could not save key: {:#}", e),
        );
    }

    info!("Registered address: {}", derived);
    respond(StatusCode::OK, json!({ "address": derived }))
}

#[derive(Deserialize)]
struct GetBalanceQuery {
    address: Option<String>,
    contract: Option<String>,
}

async fn get_balance(
    State(state): State<AppState>,
    Query(query): Query<GetBalanceQuery>,
) -> Response {
    let Some(address) = query.address.filter(|a| !a.is_empty()) else {
        return respond_error(StatusCode::BAD_REQUEST, "Missing 'address' field");
    };

    let balance = match query.contract.filter(|c| !c.is_empty()) {
        None => wallet::eth_balance(&state.config, &address).await,
        Some(contract) => wallet::erc20_balance(&state.config, &address, &contract).await,
    };

    match balance {
        Ok(balance) => respond(StatusCode::OK, json!({ "balance": balance })),
        Err(e) => respond_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Could not retrieve ethereum balance: {:#}", e),
        ),
    }
}

#[derive(Deserialize)]
struct SendEthForm {
    address: Option<String>,
    private: Option<String>,
    amount: Option<String>,
}

async fn send_eth(State(state): State<AppState>, Form(form): Form<SendEthForm>) -> Response {
    let Some(address) = form.address.filter(|a| !a.is_empty()) else {
        warn!("Got Send Ethereum order but 'address' field is missing");
        return respond_error(StatusCode::BAD_REQUEST, "Missing 'address' field");
    };
    let Some(private) = form.private.filter(|p| !p.is_empty()) else {
        warn!("Got Send Ethereum order but 'private' field is missing");
        return respond_error(StatusCode::BAD_REQUEST, "Missing 'private' field");
    };
    let Some(amount) = form.amount.filter(|a| !a.is_empty()) else {
        warn!("Got Send Ethereum order but 'amount' field is missing");
        return respond_error(StatusCode::BAD_REQUEST, "Missing 'amount' field");
    };

    match wallet::send_eth(&state.config, &private, &address, &amount).await {
        Ok(hash) => respond(StatusCode::OK, json!({ "txhash": format!("0x{:x}", hash) })),
        Err(e) => respond_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Could not send Ethereum coin: {:#}", e),
        ),
    }
}

#[derive(Deserialize)]
struct SendErc20Form {
    address: Option<String>,
    contract: Option<String>,
    private: Option<String>,
    amount: Option<String>,
}

async fn send_erc20(State(state): State<AppState>, Form(form): Form<SendErc20Form>) -> Response {
    let Some(address) = form.address.filter(|a| !a.is_empty()) else {
        return respond_error(StatusCode::BAD_REQUEST, "Missing 'address' field");
    };
    let Some(contract) = form.contract.filter(|c| !c.is_empty()) else {
        return respond_error(StatusCode::BAD_REQUEST, "Missing 'contract' field");
    };
    let Some(private) = form.private.filter(|p| !p.is_empty()) else {
        return respond_error(StatusCode::BAD_REQUEST, "Missing 'private' field");
    };
    let Some(amount) = form.amount.filter(|a| !a.is_empty()) else {
        return respond_error(StatusCode::BAD_REQUEST, "Missing 'amount' field");
    };

    match wallet::send_erc20(&state.config, &private, &contract, &address, &amount).await {
        Ok(hash) => respond(StatusCode::OK, json!({ "txhash": format!("0x{:x}", hash) })),
        Err(e) => respond_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Could not send ERC20 token: {:#}", e),
        ),
    }
}

#[derive(Deserialize)]
struct GetNotificationsQuery {
    remove: Option<String>,
}

async fn get_notifications(
    State(state): State<AppState>,
    Query(query): Query<GetNotificationsQuery>,
) -> Response {
    let remove = query.remove.as_deref() == Some("true");

    match state.store.get_notifications(remove).await {
        Ok(notifications) => match serde_json::to_value(&notifications) {
            Ok(payload) => respond(StatusCode::OK, payload),
            Err(e) => respond_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Could not encode notifications: {:#}", e),
            ),
        },
        Err(e) => {
            warn!("Notification drain failed: {:#}", e);
            respond_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not retrieve notifications",
            )
        }
    }
}

async fn not_found(request: axum::extract::Request) -> Response {
    info!("404: {} {}", request.method(), request.uri());
    respond_error(StatusCode::NOT_FOUND, "Not found")
}
