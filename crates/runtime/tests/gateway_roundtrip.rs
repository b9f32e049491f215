//! Gateway round trips over a real Unix domain socket.

use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;

use warden_runtime::gateway::{self, client::GatewayClient};
use warden_runtime::scrub::scrub;
use warden_runtime::WardenPaths;

async fn spawn_gateway(tmp: &TempDir) -> GatewayClient {
    let gateway = gateway::in_memory(tmp.path(), 64).unwrap();
    let socket = WardenPaths::at(tmp.path()).gateway_socket();
    tokio::spawn(async move {
        let _ = gateway.serve().await;
    });
    // Wait for the listener to come up.
    for _ in 0..100 {
        if socket.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    GatewayClient::new(socket, Duration::from_secs(2))
}

#[tokio::test]
async fn ping_count_upsert_query_over_the_socket() {
    let tmp = TempDir::new().unwrap();
    let client = spawn_gateway(&tmp).await;

    client.ping().await.unwrap();
    assert_eq!(client.count("knowledge").await.unwrap(), 0);

    client
        .upsert(
            "knowledge",
            json!([{"id": "a", "text": "the retry loop fixed the flaky socket"}]),
        )
        .await
        .unwrap();
    assert_eq!(client.count("knowledge").await.unwrap(), 1);

    let hits = client
        .query("knowledge", "retry loop flaky socket", 3)
        .await
        .unwrap();
    assert_eq!(hits[0].id, "a");
    assert!(hits[0].distance < 0.5);
}

#[tokio::test]
async fn upserted_text_round_trips_through_the_scrubber() {
    let tmp = TempDir::new().unwrap();
    let client = spawn_gateway(&tmp).await;

    let secret_text = "deploy used token ghp_abcdefghij0123456789 on main";
    client
        .upsert("knowledge", json!([{"id": "s", "text": secret_text}]))
        .await
        .unwrap();

    let hits = client.query("knowledge", "deploy token main", 1).await.unwrap();
    assert_eq!(hits[0].text, scrub(secret_text).as_ref());
    assert!(!hits[0].text.contains("ghp_"));
}

#[tokio::test]
async fn delete_and_error_responses() {
    let tmp = TempDir::new().unwrap();
    let client = spawn_gateway(&tmp).await;

    client
        .upsert("fix_outcomes", json!([{"id": "f1", "text": "strategy worked"}]))
        .await
        .unwrap();
    client
        .delete("fix_outcomes", &["f1".to_string()])
        .await
        .unwrap();
    assert_eq!(client.count("fix_outcomes").await.unwrap(), 0);

    // Unknown collections surface as remote errors, not dead sockets.
    let err = client.count("nonsense").await;
    assert!(matches!(err, Err(warden_runtime::GatewayError::Remote(_))));
}

#[tokio::test]
async fn auto_remember_then_semantic_recall() {
    let tmp = TempDir::new().unwrap();
    let client = spawn_gateway(&tmp).await;

    client
        .auto_remember(
            "bumping the pool size fixed the timeout under load",
            "observed during load test",
            "fix_outcome",
        )
        .await
        .unwrap();

    let hits = client
        .query("knowledge", "timeout under load pool size", 1)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].text.contains("pool size"));
}
