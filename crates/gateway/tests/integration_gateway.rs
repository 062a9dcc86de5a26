mod common;

use anyhow::Context as _;
use common::{rpc, spawn_backend, spawn_gateway, spawn_gateway_with};
use futures::StreamExt as _;
use restgate_gateway::auth::CustomHandlerRegistry;
use restgate_gateway::config::{AuthType, RateLimitPolicy, TenantAuthPolicy, TenantPolicy};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

fn api_key_policy(key_id: &str, secret: &str) -> TenantPolicy {
    TenantPolicy {
        auth: TenantAuthPolicy {
            auth_type: AuthType::ApiKey,
            api_keys: HashMap::from([(key_id.to_string(), secret.to_string())]),
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn next_event<S>(stream: &mut S) -> anyhow::Result<(String, String)>
where
    S: futures::Stream<Item = Result<sse_stream::Sse, sse_stream::Error>> + Unpin,
{
    while let Some(evt) = stream.next().await {
        let evt = evt.context("read SSE event")?;
        let data = evt.data.unwrap_or_default();
        if data.trim().is_empty() {
            continue;
        }
        return Ok((evt.event.unwrap_or_default(), data));
    }
    anyhow::bail!("event stream ended early")
}

#[tokio::test]
async fn message_without_session_answers_inline() -> anyhow::Result<()> {
    let backend = spawn_backend().await?;
    let gateway = spawn_gateway().await?;
    let info = gateway.create_server("items", backend, None).await?;
    let client = reqwest::Client::new();
    let url = gateway.url(&format!("/mcp/{}/message", info.id));

    let init: Value = client
        .post(&url)
        .json(&rpc(1, "initialize", json!({})))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(init["result"]["serverInfo"]["name"], "restgate-items");

    let list: Value = client
        .post(&url)
        .json(&rpc(2, "tools/list", json!({})))
        .send()
        .await?
        .json()
        .await?;
    let tools = list["result"]["tools"].as_array().context("tools array")?;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "getItem");

    let call: Value = client
        .post(&url)
        .json(&rpc(
            3,
            "tools/call",
            json!({ "name": "getItem", "arguments": { "id": "widget-7" } }),
        ))
        .send()
        .await?
        .json()
        .await?;
    assert_ne!(call["result"]["isError"], json!(true));
    let text = call["result"]["content"][0]["text"]
        .as_str()
        .context("content text")?;
    assert!(text.contains("widget-7"), "unexpected payload: {text}");

    Ok(())
}

#[tokio::test]
async fn tenant_resolution_failures_map_to_status_codes() -> anyhow::Result<()> {
    let gateway = spawn_gateway().await?;
    let client = reqwest::Client::new();

    // No tenant id anywhere.
    let resp = client
        .post(gateway.url("/mcp/message"))
        .json(&rpc(1, "tools/list", json!({})))
        .send()
        .await?;
    assert_eq!(resp.status(), 400);

    // Unknown tenant in the path.
    let resp = client
        .post(gateway.url("/mcp/server-doesnotexist/message"))
        .json(&rpc(1, "tools/list", json!({})))
        .send()
        .await?;
    assert_eq!(resp.status(), 404);

    Ok(())
}

#[tokio::test]
async fn server_id_query_parameter_is_a_fallback() -> anyhow::Result<()> {
    let backend = spawn_backend().await?;
    let gateway = spawn_gateway().await?;
    let info = gateway.create_server("items", backend, None).await?;
    let client = reqwest::Client::new();

    let list: Value = client
        .post(gateway.url(&format!("/mcp/message?serverId={}", info.id)))
        .json(&rpc(1, "tools/list", json!({})))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(list["result"]["tools"][0]["name"], "getItem");

    Ok(())
}

#[tokio::test]
async fn api_key_auth_gates_tenant_access() -> anyhow::Result<()> {
    let backend = spawn_backend().await?;
    let gateway = spawn_gateway().await?;
    let info = gateway
        .create_server("items", backend, Some(api_key_policy("alice", "s3cret")))
        .await?;
    let client = reqwest::Client::new();
    let url = gateway.url(&format!("/mcp/{}/message", info.id));
    let body = rpc(1, "tools/list", json!({}));

    let resp = client.post(&url).json(&body).send().await?;
    assert_eq!(resp.status(), 401, "no credentials");

    let resp = client
        .post(&url)
        .header("x-api-key", "alice:wrong")
        .json(&body)
        .send()
        .await?;
    assert_eq!(resp.status(), 401, "wrong secret");

    let resp = client
        .post(&url)
        .header("x-api-key", "alice:s3cret")
        .json(&body)
        .send()
        .await?;
    assert_eq!(resp.status(), 200);

    Ok(())
}

#[tokio::test]
async fn custom_handler_auth_gates_tenant_access() -> anyhow::Result<()> {
    let handlers = Arc::new(CustomHandlerRegistry::new());
    handlers.register("pass-header", |headers, _policy| {
        headers.contains_key("x-let-me-in")
    });

    let backend = spawn_backend().await?;
    let gateway = spawn_gateway_with(handlers).await?;
    let policy = TenantPolicy {
        auth: TenantAuthPolicy {
            auth_type: AuthType::Custom,
            custom_handler: Some("pass-header".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    let info = gateway.create_server("items", backend, Some(policy)).await?;
    let client = reqwest::Client::new();
    let url = gateway.url(&format!("/mcp/{}/message", info.id));
    let body = rpc(1, "tools/list", json!({}));

    let resp = client.post(&url).json(&body).send().await?;
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(&url)
        .header("x-let-me-in", "1")
        .json(&body)
        .send()
        .await?;
    assert_eq!(resp.status(), 200);

    Ok(())
}

#[tokio::test]
async fn rate_limited_tenant_rejects_burst_with_429() -> anyhow::Result<()> {
    let backend = spawn_backend().await?;
    let gateway = spawn_gateway().await?;
    let policy = TenantPolicy {
        rate_limit: RateLimitPolicy {
            enabled: true,
            max_tps: 1,
            max_concurrent: 10,
            request_timeout_ms: 30_000,
        },
        ..Default::default()
    };
    let info = gateway.create_server("items", backend, Some(policy)).await?;
    let client = reqwest::Client::new();
    let url = gateway.url(&format!("/mcp/{}/message", info.id));
    let body = rpc(1, "tools/list", json!({}));

    let first = client.post(&url).json(&body).send().await?;
    assert_eq!(first.status(), 200);

    let second = client.post(&url).json(&body).send().await?;
    assert_eq!(second.status(), 429);

    Ok(())
}

#[tokio::test]
async fn sse_session_receives_endpoint_then_responses() -> anyhow::Result<()> {
    let backend = spawn_backend().await?;
    let gateway = spawn_gateway().await?;
    let info = gateway.create_server("items", backend, None).await?;
    let client = reqwest::Client::new();

    let resp = client
        .get(gateway.url(&format!("/mcp/{}/sse", info.id)))
        .send()
        .await?;
    assert_eq!(resp.status(), 200);
    let mut stream = sse_stream::SseStream::from_byte_stream(resp.bytes_stream());

    let (event, endpoint) = next_event(&mut stream).await?;
    assert_eq!(event, "endpoint");
    assert!(
        endpoint.starts_with(&format!("/mcp/{}/message?sessionId=", info.id)),
        "unexpected endpoint: {endpoint}"
    );

    let resp = client
        .post(gateway.url(&endpoint))
        .json(&rpc(7, "tools/list", json!({})))
        .send()
        .await?;
    assert_eq!(resp.status(), 202);

    let (event, data) = next_event(&mut stream).await?;
    assert_eq!(event, "message");
    let reply: Value = serde_json::from_str(&data)?;
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["result"]["tools"][0]["name"], "getItem");

    Ok(())
}

#[tokio::test]
async fn idle_sse_stream_does_not_pin_a_concurrency_slot() -> anyhow::Result<()> {
    let backend = spawn_backend().await?;
    let gateway = spawn_gateway().await?;
    let policy = TenantPolicy {
        rate_limit: RateLimitPolicy {
            enabled: true,
            max_tps: 100,
            max_concurrent: 1,
            request_timeout_ms: 30_000,
        },
        ..Default::default()
    };
    let info = gateway.create_server("items", backend, Some(policy)).await?;
    let client = reqwest::Client::new();

    let resp = client
        .get(gateway.url(&format!("/mcp/{}/sse", info.id)))
        .send()
        .await?;
    let mut stream = sse_stream::SseStream::from_byte_stream(resp.bytes_stream());
    let (_event, endpoint) = next_event(&mut stream).await?;

    // The connected stream must leave the single slot free for messages.
    let resp = client
        .post(gateway.url(&endpoint))
        .json(&rpc(1, "tools/list", json!({})))
        .send()
        .await?;
    assert_eq!(resp.status(), 202);

    let (event, _data) = next_event(&mut stream).await?;
    assert_eq!(event, "message");

    Ok(())
}

#[tokio::test]
async fn unknown_session_id_is_rejected() -> anyhow::Result<()> {
    let backend = spawn_backend().await?;
    let gateway = spawn_gateway().await?;
    let info = gateway.create_server("items", backend, None).await?;
    let client = reqwest::Client::new();

    let resp = client
        .post(gateway.url(&format!(
            "/mcp/{}/message?sessionId=nope",
            info.id
        )))
        .json(&rpc(1, "tools/list", json!({})))
        .send()
        .await?;
    assert_eq!(resp.status(), 404);

    Ok(())
}

#[tokio::test]
async fn stopping_a_server_ends_sessions_and_routing() -> anyhow::Result<()> {
    let backend = spawn_backend().await?;
    let gateway = spawn_gateway().await?;
    let info = gateway.create_server("items", backend, None).await?;
    let client = reqwest::Client::new();

    let resp = client
        .get(gateway.url(&format!("/mcp/{}/sse", info.id)))
        .send()
        .await?;
    let mut stream = sse_stream::SseStream::from_byte_stream(resp.bytes_stream());
    let (event, _endpoint) = next_event(&mut stream).await?;
    assert_eq!(event, "endpoint");

    assert!(gateway.service.stop_server(&info.id));

    // The stream ends once the session's sender is dropped.
    assert!(next_event(&mut stream).await.is_err());

    let resp = client
        .post(gateway.url(&format!("/mcp/{}/message", info.id)))
        .json(&rpc(1, "tools/list", json!({})))
        .send()
        .await?;
    assert_eq!(resp.status(), 404);

    Ok(())
}

#[tokio::test]
async fn admin_api_manages_server_lifecycle() -> anyhow::Result<()> {
    let backend = spawn_backend().await?;
    let gateway = spawn_gateway().await?;
    let client = reqwest::Client::new();

    let resp = client
        .post(gateway.url("/servers"))
        .json(&json!({
            "name": "items",
            "spec": common::ITEMS_SPEC,
            "baseUrl": format!("http://{backend}"),
        }))
        .send()
        .await?;
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await?;
    let id = created["id"].as_str().context("server id")?.to_string();
    assert_eq!(created["toolCount"], 1);
    assert_eq!(
        created["accessUrl"],
        format!("http://gateway.test/mcp/{id}/sse")
    );

    let listed: Value = client
        .get(gateway.url("/servers"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let usage: Value = client
        .get(gateway.url(&format!("/servers/{id}/usage")))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(usage["usageRate"], 0.0);

    let resp = client
        .delete(gateway.url(&format!("/servers/{id}")))
        .send()
        .await?;
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(gateway.url(&format!("/servers/{id}")))
        .send()
        .await?;
    assert_eq!(resp.status(), 404);

    Ok(())
}

#[tokio::test]
async fn invalid_create_requests_map_to_status_codes() -> anyhow::Result<()> {
    let gateway = spawn_gateway().await?;
    let client = reqwest::Client::new();

    // Incomplete auth policy.
    let resp = client
        .post(gateway.url("/servers"))
        .json(&json!({
            "name": "bad",
            "spec": common::ITEMS_SPEC,
            "baseUrl": "http://127.0.0.1:9",
            "policy": { "auth": { "authType": "jwt" } },
        }))
        .send()
        .await?;
    assert_eq!(resp.status(), 400);

    // Unparseable document.
    let resp = client
        .post(gateway.url("/servers"))
        .json(&json!({
            "name": "bad",
            "spec": "not: [valid openapi",
            "baseUrl": "http://127.0.0.1:9",
        }))
        .send()
        .await?;
    assert_eq!(resp.status(), 400);

    Ok(())
}
