//! `GatewayClient` against an in-process Axum stand-in for the broker bridge.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;

use zg_inference::broker::{
    GatewayClient, HEADER_GATEWAY_ADDRESS, HEADER_GATEWAY_SIGNATURE, HEADER_GATEWAY_TIMESTAMP,
    gateway_signing_message,
};
use zg_inference::error::{IdentityErrorKind, InferenceError};
use zg_inference::ledger::{Amount, LedgerClient};
use zg_inference::provider::ProviderRegistry;
use zg_inference::wallet::{Identity, LocalKeyConnector, WalletConnector, eth};

const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const ANVIL_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
const SECOND_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
const PROVIDER: &str = "0xf07240efa67755b5311bc75784a061edb47165dd";
const FORBIDDEN_PROVIDER: &str = "0x00000000000000000000000000000000000000aa";
const BROKEN_PROVIDER: &str = "0x00000000000000000000000000000000000000bb";

#[derive(Clone, Default)]
struct BridgeState {
    deposits: Arc<Mutex<Vec<(String, String)>>>,
}

fn signer_of(headers: &HeaderMap, path: &str, body: &str) -> Result<String, String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| format!("missing {name}"))
    };
    let address = header(HEADER_GATEWAY_ADDRESS)?;
    let timestamp: i64 = header(HEADER_GATEWAY_TIMESTAMP)?
        .parse()
        .map_err(|_| "bad timestamp".to_string())?;
    let signature = eth::decode_hex(&header(HEADER_GATEWAY_SIGNATURE)?)?;
    let message = gateway_signing_message("POST", path, timestamp, body);
    let recovered = eth::recover_personal_signer(message.as_bytes(), &signature)?;
    if recovered != address {
        return Err("signature does not match address".to_string());
    }
    Ok(recovered)
}

async fn ledger(Path(address): Path<String>) -> Response {
    if address == ANVIL_ADDRESS {
        axum::Json(json!({"totalBalance": "50000000000000000"})).into_response()
    } else {
        (StatusCode::NOT_FOUND, "no ledger").into_response()
    }
}

async fn deposit(
    State(state): State<BridgeState>,
    Path(address): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let path = format!("/ledger/{address}/deposit");
    if signer_of(&headers, &path, &body).as_deref() != Ok(address.as_str()) {
        return (StatusCode::UNAUTHORIZED, "bad signature").into_response();
    }
    let value: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
    let amount = value["amount"].as_str().unwrap_or_default().to_string();
    if amount.parse::<u128>().unwrap_or(0) > Amount::from_og(10).neuron() {
        return (StatusCode::PAYMENT_REQUIRED, "insufficient wallet balance").into_response();
    }
    state.deposits.lock().unwrap().push((address, amount));
    StatusCode::OK.into_response()
}

async fn acknowledge(Path(provider): Path<String>, headers: HeaderMap, body: String) -> Response {
    let path = format!("/providers/{provider}/acknowledge");
    if signer_of(&headers, &path, &body).is_err() {
        return (StatusCode::UNAUTHORIZED, "bad signature").into_response();
    }
    match provider.as_str() {
        PROVIDER => StatusCode::OK.into_response(),
        FORBIDDEN_PROVIDER => (StatusCode::FORBIDDEN, "not allowed").into_response(),
        _ => (StatusCode::NOT_FOUND, "signer not found").into_response(),
    }
}

async fn metadata(Path(provider): Path<String>) -> Response {
    match provider.as_str() {
        PROVIDER => axum::Json(json!({
            "endpoint": "https://node.example/v1/proxy",
            "model": "llama-3.3-70b-instruct"
        }))
        .into_response(),
        BROKEN_PROVIDER => {
            axum::Json(json!({"endpoint": "ftp://node.example", "model": "m"})).into_response()
        }
        _ => (StatusCode::NOT_FOUND, "unknown provider").into_response(),
    }
}

async fn verify(body: String) -> Response {
    let value: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
    let valid = value["chatId"] == "c1" && value["content"] == "hello";
    axum::Json(json!({ "valid": valid })).into_response()
}

fn is_bind_permission_error<E: std::fmt::Display>(err: &E) -> bool {
    err.to_string().contains("Operation not permitted")
        || err.to_string().contains("Permission denied")
}

async fn start_bridge() -> Option<(GatewayClient, BridgeState)> {
    let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(e) if is_bind_permission_error(&e) => return None,
        Err(e) => panic!("failed to bind test bridge: {e}"),
    };
    let addr = listener.local_addr().unwrap();
    let state = BridgeState::default();

    let app = Router::new()
        .route("/ledger/{address}", get(ledger))
        .route("/ledger/{address}/deposit", post(deposit))
        .route("/providers/{provider}/acknowledge", post(acknowledge))
        .route("/providers/{provider}/metadata", get(metadata))
        .route("/providers/{provider}/verify", post(verify))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let client = GatewayClient::new(format!("http://{addr}/"), Duration::from_secs(5));
    Some((client, state))
}

async fn identity(key: &str) -> Identity {
    LocalKeyConnector::new(Some(SecretString::from(key)))
        .connect()
        .await
        .unwrap()
}

#[tokio::test]
async fn balance_is_read_and_missing_account_is_typed() {
    let Some((client, _state)) = start_bridge().await else {
        return;
    };

    let account = client.get_balance(&identity(ANVIL_KEY).await).await.unwrap();
    assert_eq!(account.total_balance, Amount::parse_og("0.05").unwrap());

    let stranger = identity(SECOND_KEY).await;
    let err = client.get_balance(&stranger).await.unwrap_err();
    assert!(err.is_missing_ledger_account(), "{err}");
}

#[tokio::test]
async fn deposits_are_signed_and_insufficient_funds_is_typed() {
    let Some((client, state)) = start_bridge().await else {
        return;
    };
    let me = identity(ANVIL_KEY).await;

    client.top_up(&me, Amount::from_og(1)).await.unwrap();
    assert_eq!(
        *state.deposits.lock().unwrap(),
        vec![(ANVIL_ADDRESS.to_string(), "1000000000000000000".to_string())]
    );

    let err = client.top_up(&me, Amount::from_og(50)).await.unwrap_err();
    assert_eq!(
        err,
        InferenceError::InsufficientFunds {
            requested: "50 OG".to_string(),
        }
    );
    assert_eq!(state.deposits.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn acknowledgment_status_codes_are_mapped() {
    let Some((client, _state)) = start_bridge().await else {
        return;
    };
    let me = identity(ANVIL_KEY).await;

    client.acknowledge_provider(&me, PROVIDER).await.unwrap();

    let err = client
        .acknowledge_provider(&me, FORBIDDEN_PROVIDER)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        InferenceError::Identity {
            address: ANVIL_ADDRESS.to_string(),
            kind: IdentityErrorKind::PermissionDenied,
        }
    );

    let err = client
        .acknowledge_provider(&me, "0x00000000000000000000000000000000000000cc")
        .await
        .unwrap_err();
    assert!(matches!(err, InferenceError::ProviderUnreachable { .. }));
}

#[tokio::test]
async fn metadata_is_validated() {
    let Some((client, _state)) = start_bridge().await else {
        return;
    };

    let metadata = client.service_metadata(PROVIDER).await.unwrap();
    assert_eq!(metadata.model, "llama-3.3-70b-instruct");
    assert_eq!(
        metadata.completions_url(),
        "https://node.example/v1/proxy/chat/completions"
    );

    for provider in [BROKEN_PROVIDER, "0x00000000000000000000000000000000000000cc"] {
        let err = client.service_metadata(provider).await.unwrap_err();
        assert!(
            matches!(err, InferenceError::ProviderUnreachable { .. }),
            "{provider}: {err}"
        );
    }
}

#[tokio::test]
async fn verification_result_is_returned() {
    let Some((client, _state)) = start_bridge().await else {
        return;
    };
    let me = identity(ANVIL_KEY).await;

    assert_eq!(
        client
            .verify_response(&me, PROVIDER, "c1", "hello")
            .await
            .unwrap(),
        Some(true)
    );
    assert_eq!(
        client
            .verify_response(&me, PROVIDER, "c1", "tampered")
            .await
            .unwrap(),
        Some(false)
    );
}

#[tokio::test]
async fn unreachable_bridge_is_a_network_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = match std::net::TcpListener::bind("127.0.0.1:0") {
        Ok(listener) => listener,
        Err(e) if is_bind_permission_error(&e) => return,
        Err(e) => panic!("failed to bind: {e}"),
    };
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = GatewayClient::new(format!("http://{addr}"), Duration::from_secs(2));
    let err = client
        .get_balance(&identity(ANVIL_KEY).await)
        .await
        .unwrap_err();
    assert!(matches!(err, InferenceError::Network { .. }), "{err}");
}
