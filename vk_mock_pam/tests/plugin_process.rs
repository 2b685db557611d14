//! End-to-end tests launching the mock PAM as a real child process.

use std::{path::PathBuf, time::Duration};
use valkyrie::{
    Amount, ErrorCode, Lifecycle,
    pam::{
        self, BackendArgs, PamClient, PamRegistry,
        models::{
            AddTransactionRequest, GetBalanceRequest, GetSessionRequest, Transaction,
            TransactionType,
        },
    },
    pipeline::CallContext,
    plugin::{
        self, HandshakeError, PluginConfig, PluginError, PluginInitConfig, PluginPamClient,
        PluginState, protocol_version::MAGIC_COOKIE_KEY,
    },
};
use vk_mock_pam::{FAIL_INIT_ENV, HANDSHAKE_VERSION_ENV};

const MOCK_PAM: &str = env!("CARGO_BIN_EXE_vk_mock_pam");

fn init() -> PluginInitConfig {
    PluginInitConfig {
        pam_url: "mock://pam".to_string(),
        api_key: "key".to_string(),
        warehouse: None,
    }
}

fn config() -> PluginConfig {
    PluginConfig::new("mock", MOCK_PAM, init())
}

fn balance_request(player_id: &str, token: &str, currency: &str) -> GetBalanceRequest {
    GetBalanceRequest {
        provider: "netent".to_string(),
        player_id: player_id.to_string(),
        token: token.to_string(),
        currency: currency.to_string(),
        game_id: None,
    }
}

fn withdraw(id: &str, cash: &str) -> AddTransactionRequest {
    AddTransactionRequest {
        provider: "netent".to_string(),
        token: "t1".to_string(),
        transaction: Transaction {
            provider_transaction_id: id.to_string(),
            player_id: "p1".to_string(),
            currency: "EUR".to_string(),
            transaction_type: TransactionType::Withdraw,
            cash_amount: cash.parse().unwrap(),
            bonus_amount: Amount::zero(),
            promo_amount: Amount::zero(),
            jackpot_contribution: None,
            game_id: Some("starburst".to_string()),
            game_round_ref: Some("r-1".to_string()),
            provider_bet_ref: None,
            is_game_over: false,
            transaction_datetime: chrono::Utc::now(),
        },
    }
}

#[tokio::test]
async fn test_wallet_flow_through_registry() {
    let lifecycle = Lifecycle::new();
    let registry = PamRegistry::new();
    pam::rest::register(&registry);
    plugin::register(&registry);

    let mut args = BackendArgs::new("mock://pam", "key", lifecycle.clone());
    args.plugin_path = Some(PathBuf::from(MOCK_PAM));
    args.plugin_name = "mock".to_string();
    let client = registry.build("plugin", args).await.unwrap();
    assert_eq!(client.name(), "mock");

    let session = client
        .get_session(pam::ready(
            CallContext::new(),
            GetSessionRequest {
                provider: "netent".to_string(),
                token: "t1".to_string(),
            },
        ))
        .await
        .unwrap();
    assert_eq!(session.player_id, "p1");
    assert_eq!(session.currency, "EUR");

    let balance = client
        .get_balance(pam::ready(CallContext::new(), balance_request("p1", "t1", "EUR")))
        .await
        .unwrap();
    assert_eq!(balance.cash, Amount::from(100));

    let booked = client
        .add_transaction(pam::rounded(CallContext::new(), withdraw("b1", "12.345678")))
        .await
        .unwrap();
    assert_eq!(booked.balance.cash, "87.654322".parse().unwrap());

    let duplicate = client
        .add_transaction(pam::rounded(CallContext::new(), withdraw("b1", "1")))
        .await
        .unwrap_err();
    assert_eq!(duplicate.code(), ErrorCode::DuplicateTransaction);

    let overdraft = client
        .add_transaction(pam::rounded(CallContext::new(), withdraw("b2", "1000")))
        .await
        .unwrap_err();
    assert_eq!(overdraft.code(), ErrorCode::InsufficientCash);
    assert_eq!(overdraft.balance().unwrap().cash, "87.654322".parse().unwrap());

    let mismatch = client
        .get_balance(pam::ready(CallContext::new(), balance_request("p1", "t1", "SEK")))
        .await
        .unwrap_err();
    assert_eq!(mismatch.code(), ErrorCode::CurrencyMismatch);

    drop(client);
    assert!(lifecycle.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_precision_failure_never_reaches_the_plugin() {
    let lifecycle = Lifecycle::new();
    let client = PluginPamClient::launch(config(), &lifecycle).await.unwrap();
    let error = client
        .add_transaction(pam::rounded(CallContext::new(), withdraw("b1", "1.0000001")))
        .await
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::PrecisionLoss);

    let balance = client
        .get_balance(pam::ready(CallContext::new(), balance_request("p1", "t1", "EUR")))
        .await
        .unwrap();
    assert_eq!(balance.cash, Amount::from(100));
    assert!(lifecycle.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_handshake_version_mismatch_is_fatal() {
    let lifecycle = Lifecycle::new();
    let result = PluginPamClient::launch(config().with_env(HANDSHAKE_VERSION_ENV, "99"), &lifecycle).await;
    assert!(matches!(
        result,
        Err(PluginError::Handshake(HandshakeError::VersionMismatch { actual: 99, .. }))
    ));
    assert!(lifecycle.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_init_failure_is_fatal() {
    let lifecycle = Lifecycle::new();
    let result = PluginPamClient::launch(config().with_env(FAIL_INIT_ENV, "1"), &lifecycle).await;
    match result {
        Err(PluginError::Init(error)) => assert_eq!(error.code(), ErrorCode::Unauthorized),
        other => panic!("expected init failure, got {:?}", other.map(|c| c.state())),
    }
    assert!(lifecycle.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_registry_reports_missing_executable() {
    let registry = PamRegistry::new();
    plugin::register(&registry);
    let mut args = BackendArgs::new("mock://pam", "key", Lifecycle::new());
    args.plugin_path = Some(PathBuf::from("/nonexistent/vk_mock_pam"));
    let error = registry.build("plugin", args).await.err().unwrap();
    assert!(error.to_string().contains("plugin"));
}

#[tokio::test]
async fn test_shutdown_stops_plugin() {
    let lifecycle = Lifecycle::new();
    let client = PluginPamClient::launch(config(), &lifecycle).await.unwrap();
    assert_eq!(client.state(), PluginState::Running);

    assert!(lifecycle.shutdown(Duration::from_secs(5)).await);
    assert_eq!(client.state(), PluginState::Stopped);

    let error = client
        .get_balance(pam::ready(CallContext::new(), balance_request("p1", "t1", "EUR")))
        .await
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::PluginUnavailable);
    assert!(!error.is_retryable());
}

#[tokio::test]
async fn test_refuses_to_run_by_hand() {
    let output = tokio::process::Command::new(MOCK_PAM)
        .env_remove(MAGIC_COOKIE_KEY)
        .output()
        .await
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("launched by the gateway"));
}
