use ledger_core::{CandidateBlock, ChainValidity, Ledger, LedgerConfig, MineControl, SharedLedger};
use ledger_node::{app, run, AppState};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Serve `ledger` on an ephemeral port and return its base URL.
async fn serve(ledger: SharedLedger) -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let router = app(AppState::new(ledger));
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(format!("http://{addr}"))
}

async fn spawn_node(config: LedgerConfig) -> anyhow::Result<(String, SharedLedger)> {
    let ledger = SharedLedger::new(Ledger::new(config)?);
    ledger.init()?;
    Ok((serve(ledger.clone()).await?, ledger))
}

async fn submit(client: &reqwest::Client, base: &str, body: Value) -> anyhow::Result<reqwest::Response> {
    Ok(client
        .post(format!("{base}/transactions/new"))
        .json(&body)
        .send()
        .await?)
}

#[tokio::test]
async fn submit_mine_and_read_chain() -> anyhow::Result<()> {
    let (base, _ledger) = spawn_node(LedgerConfig::with_difficulty(2)).await?;
    let client = reqwest::Client::new();

    let res = submit(&client, &base, json!({"sender": "A", "recipient": "B", "amount": 10})).await?;
    assert_eq!(res.status(), StatusCode::CREATED);
    let accepted: Value = res.json().await?;
    assert_eq!(accepted["index"], 1);
    assert_eq!(accepted["message"], "Transaction will be added to Block 1");
    submit(&client, &base, json!({"sender": "B", "recipient": "C", "amount": 5})).await?;

    let res = client.get(format!("{base}/mine")).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    let mined: Value = res.json().await?;
    assert_eq!(mined["message"], "New Block Forged");
    assert_eq!(mined["index"], 1);
    assert_eq!(mined["transactions"].as_array().map(Vec::len), Some(2));

    let chain: Value = client.get(format!("{base}/chain")).send().await?.json().await?;
    assert_eq!(chain["length"], 2);
    assert_eq!(chain["chain"][1]["previous_hash"], chain["chain"][0]["hash"]);
    assert!(chain["chain"][1]["hash"]
        .as_str()
        .is_some_and(|h| h.starts_with("00")));

    let pending: Value = client.get(format!("{base}/pending")).send().await?.json().await?;
    assert_eq!(pending["length"], 0);

    let validity: Value = client
        .get(format!("{base}/chain/validate"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(validity, json!({"valid": true}));
    Ok(())
}

#[tokio::test]
async fn missing_fields_are_rejected() -> anyhow::Result<()> {
    let (base, ledger) = spawn_node(LedgerConfig::with_difficulty(1)).await?;
    let client = reqwest::Client::new();

    let res = submit(&client, &base, json!({"sender": "A"})).await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await?;
    assert_eq!(
        body,
        json!({"error": "missing fields", "fields": ["recipient", "amount"]})
    );
    assert!(ledger.pending_transactions().is_empty());
    Ok(())
}

#[tokio::test]
async fn malformed_bodies_get_json_errors() -> anyhow::Result<()> {
    let (base, ledger) = spawn_node(LedgerConfig::with_difficulty(1)).await?;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{base}/transactions/new"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await?;
    assert!(body["error"]
        .as_str()
        .is_some_and(|e| e.starts_with("invalid request body")));

    let res = client
        .post(format!("{base}/transactions/new"))
        .body(r#"{"sender": "A", "recipient": "B", "amount": 1}"#)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body: Value = res.json().await?;
    assert!(body["error"].is_string());
    assert!(ledger.pending_transactions().is_empty());
    Ok(())
}

#[tokio::test]
async fn mining_an_empty_pool_is_a_client_error() -> anyhow::Result<()> {
    let (base, ledger) = spawn_node(LedgerConfig::with_difficulty(1)).await?;
    let client = reqwest::Client::new();

    let res = client.post(format!("{base}/mine")).send().await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await?;
    assert_eq!(body["error"], "no pending transactions to mine");
    assert_eq!(ledger.len(), 1);
    Ok(())
}

#[tokio::test]
async fn mining_budget_exhaustion_is_unavailable() -> anyhow::Result<()> {
    let strict = LedgerConfig {
        difficulty: 1,
        max_iterations: Some(1),
        ..LedgerConfig::default()
    };
    let mut ledger = Ledger::new(strict)?;
    // Genesis may need more than one nonce, so mine it without the budget.
    ledger.init_with(&MineControl::unbounded())?;
    let ledger = SharedLedger::new(ledger);
    let base = serve(ledger.clone()).await?;
    let client = reqwest::Client::new();

    // Keep trying fresh pools until a one-nonce search misses (15 in 16 do).
    let mut saw_abort = false;
    for i in 0..32 {
        submit(&client, &base, json!({"sender": "A", "recipient": "B", "amount": i})).await?;
        let res = client.get(format!("{base}/mine")).send().await?;
        if res.status() == StatusCode::SERVICE_UNAVAILABLE {
            let body: Value = res.json().await?;
            assert_eq!(body["error"], "mining aborted: iteration limit reached");
            saw_abort = true;
            break;
        }
        assert_eq!(res.status(), StatusCode::OK);
    }
    assert!(saw_abort);
    assert!(!ledger.pending_transactions().is_empty());
    assert_eq!(ledger.validate_chain(), ChainValidity::Valid);
    Ok(())
}

#[tokio::test]
async fn health_and_cors() -> anyhow::Result<()> {
    let (base, _ledger) = spawn_node(LedgerConfig::with_difficulty(1)).await?;
    let client = reqwest::Client::new();
    let res = client
        .get(format!("{base}/health"))
        .header("Origin", "https://example.com")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("access-control-allow-origin"));
    let body: Value = res.json().await?;
    assert_eq!(body, json!({"status": "ok"}));
    Ok(())
}

#[tokio::test]
async fn shutdown_interrupts_mining_in_flight() -> anyhow::Result<()> {
    // Difficulty-6 genesis found offline; block 1 needs millions of nonces.
    let genesis = CandidateBlock {
        index: 0,
        transactions: vec![],
        timestamp: 1_700_000_000_000,
        previous_hash: "0".into(),
        nonce: 11_733_440,
    }
    .finalize();
    assert_eq!(
        genesis.hash(),
        "000000b16f145b0c12915dc3f283c97f64ae591cbb6164f08e9e982367d5ea9c"
    );
    let ledger = SharedLedger::new(Ledger::from_chain(
        LedgerConfig::with_difficulty(6),
        vec![genesis],
    )?);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let base = format!("http://{}", listener.local_addr()?);
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(run(listener, AppState::new(ledger.clone()), async {
        let _ = stopped.await;
    }));

    let client = reqwest::Client::new();
    submit(&client, &base, json!({"sender": "A", "recipient": "B", "amount": 1})).await?;
    let mining = tokio::spawn(client.get(format!("{base}/mine")).send());
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!mining.is_finished());

    let _ = stop.send(());
    tokio::time::timeout(Duration::from_secs(5), server).await???;

    let res = mining.await??;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = res.json().await?;
    assert_eq!(body["error"], "mining aborted: cancelled by caller");
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.pending_transactions().len(), 1);
    Ok(())
}
