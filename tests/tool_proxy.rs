//! Tool proxy correlation tests.
//!
//! These exercise the proxy against a recording outbound seam instead of
//! a real transport: discovery replace semantics, resolve/reject paths,
//! the timeout window, and late-response safety.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tokio::time::sleep;

use agentlink::protocol::{
    DeclarationType, Envelope, ParameterSchema, Payload, PropertySchema, ToolDefinition,
};
use agentlink::{Outbound, ProtocolError, ToolProxy};

/// Outbound seam that records every send and never delivers anything.
#[derive(Default)]
struct RecordingOutbound {
    sent: Mutex<Vec<(String, Envelope)>>,
}

impl RecordingOutbound {
    async fn last_request(&self) -> Option<(String, String)> {
        self.sent.lock().await.last().map(|(_, envelope)| {
            let tool = match &envelope.payload {
                Payload::ToolExecutionRequest { tool, .. } => tool.clone(),
                other => panic!("proxy sent a non-tool frame: {other:?}"),
            };
            (envelope.id.clone(), tool)
        })
    }
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn send_to(&self, client_id: &str, message: Envelope) -> Result<(), ProtocolError> {
        self.sent
            .lock()
            .await
            .push((client_id.to_string(), message));
        Ok(())
    }
}

/// Outbound seam with no connected clients at all.
struct NoClients;

#[async_trait]
impl Outbound for NoClients {
    async fn send_to(&self, client_id: &str, _message: Envelope) -> Result<(), ProtocolError> {
        Err(ProtocolError::UnknownClient(client_id.to_string()))
    }
}

fn echo_definition() -> ToolDefinition {
    let mut properties = BTreeMap::new();
    properties.insert(
        "msg".to_string(),
        PropertySchema::new("string", "Text to echo"),
    );
    ToolDefinition::new(
        "echo",
        "Echo the arguments back",
        ParameterSchema::object(properties, vec!["msg".to_string()]),
    )
}

fn named_definition(name: &str) -> ToolDefinition {
    ToolDefinition::new(name, "", ParameterSchema::empty_object())
}

fn args(key: &str, value: Value) -> Map<String, Value> {
    let mut parameters = Map::new();
    parameters.insert(key.to_string(), value);
    parameters
}

// ── Discovery ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn discovery_replaces_the_prior_set_wholesale() {
    let proxy = ToolProxy::new(Arc::new(RecordingOutbound::default()));

    proxy
        .handle_tool_discovery("c1", vec![named_definition("a"), named_definition("b")])
        .await;
    assert!(proxy.has_client_tool("c1", "a").await);
    assert!(proxy.has_client_tool("c1", "b").await);

    proxy
        .handle_tool_discovery("c1", vec![named_definition("a")])
        .await;
    let tools = proxy.client_tools("c1").await;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "a");
    assert!(!proxy.has_client_tool("c1", "b").await);
}

#[tokio::test]
async fn unknown_client_has_an_empty_tool_set() {
    let proxy = ToolProxy::new(Arc::new(RecordingOutbound::default()));
    assert!(proxy.client_tools("nobody").await.is_empty());
    assert!(!proxy.has_client_tool("nobody", "echo").await);
    assert!(proxy.client_tool_definition("nobody", "echo").await.is_none());
}

#[tokio::test]
async fn function_declarations_map_type_tags_with_string_default() {
    let proxy = ToolProxy::new(Arc::new(RecordingOutbound::default()));

    let mut properties = BTreeMap::new();
    properties.insert("count".to_string(), PropertySchema::new("number", ""));
    properties.insert("flag".to_string(), PropertySchema::new("boolean", ""));
    properties.insert("list".to_string(), PropertySchema::new("array", ""));
    properties.insert("blob".to_string(), PropertySchema::new("object", ""));
    properties.insert("weird".to_string(), PropertySchema::new("duration", ""));
    let definition = ToolDefinition::new(
        "typed",
        "",
        ParameterSchema::object(properties, vec!["count".to_string()]),
    );
    proxy.handle_tool_discovery("c1", vec![definition]).await;

    let declarations = proxy.function_declarations("c1").await;
    assert_eq!(declarations.len(), 1);
    let parameters = &declarations[0].parameters;
    assert_eq!(parameters.schema_type, DeclarationType::Object);
    assert_eq!(
        parameters.properties["count"].property_type,
        DeclarationType::Number
    );
    assert_eq!(
        parameters.properties["flag"].property_type,
        DeclarationType::Boolean
    );
    assert_eq!(
        parameters.properties["list"].property_type,
        DeclarationType::Array
    );
    assert_eq!(
        parameters.properties["blob"].property_type,
        DeclarationType::Object
    );
    assert_eq!(
        parameters.properties["weird"].property_type,
        DeclarationType::String
    );
    assert_eq!(parameters.required, vec!["count".to_string()]);
}

// ── Execution correlation ───────────────────────────────────────────────────

#[tokio::test]
async fn execute_tool_resolves_with_the_response_result() {
    let outbound = Arc::new(RecordingOutbound::default());
    let proxy = Arc::new(ToolProxy::new(outbound.clone()));
    proxy.handle_tool_discovery("c1", vec![echo_definition()]).await;

    let call = {
        let proxy = proxy.clone();
        tokio::spawn(async move { proxy.execute_tool("c1", "echo", args("msg", json!("hi"))).await })
    };

    let request_id = loop {
        if let Some((id, tool)) = outbound.last_request().await {
            assert_eq!(tool, "echo");
            break id;
        }
        sleep(Duration::from_millis(5)).await;
    };
    proxy
        .handle_tool_response(&request_id, Some(json!({ "msg": "hi" })), None)
        .await;

    let result = call.await.unwrap().unwrap();
    assert_eq!(result, json!({ "msg": "hi" }));
}

#[tokio::test]
async fn execute_tool_rejects_with_the_error_string_verbatim() {
    let outbound = Arc::new(RecordingOutbound::default());
    let proxy = Arc::new(ToolProxy::new(outbound.clone()));

    let call = {
        let proxy = proxy.clone();
        tokio::spawn(async move { proxy.execute_tool("c1", "bogus", Map::new()).await })
    };

    let request_id = loop {
        if let Some((id, _)) = outbound.last_request().await {
            break id;
        }
        sleep(Duration::from_millis(5)).await;
    };
    proxy
        .handle_tool_response(&request_id, None, Some("Unknown tool: bogus".to_string()))
        .await;

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, ProtocolError::ToolExecution(_)));
    assert_eq!(err.to_string(), "Unknown tool: bogus");
}

#[tokio::test]
async fn execute_tool_times_out_naming_the_tool() {
    let outbound = Arc::new(RecordingOutbound::default());
    let proxy = ToolProxy::with_timeout(outbound.clone(), Duration::from_millis(50));

    let started = Instant::now();
    let err = proxy
        .execute_tool("c1", "slow_tool", Map::new())
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(err.to_string(), "Tool execution timeout: slow_tool");
    assert!(err.is_timeout());
    assert!(elapsed >= Duration::from_millis(40), "fired early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(500), "fired late: {elapsed:?}");

    // A late response for the timed-out id is a no-op.
    let (request_id, _) = outbound.last_request().await.unwrap();
    proxy
        .handle_tool_response(&request_id, Some(json!("too late")), None)
        .await;
}

#[tokio::test]
async fn unknown_request_id_does_not_disturb_other_pending_calls() {
    let outbound = Arc::new(RecordingOutbound::default());
    let proxy = Arc::new(ToolProxy::new(outbound.clone()));

    let call = {
        let proxy = proxy.clone();
        tokio::spawn(async move { proxy.execute_tool("c1", "echo", Map::new()).await })
    };

    let request_id = loop {
        if let Some((id, _)) = outbound.last_request().await {
            break id;
        }
        sleep(Duration::from_millis(5)).await;
    };

    // Never registered — must not throw, must not touch the real entry.
    proxy
        .handle_tool_response("never-registered", Some(json!(1)), None)
        .await;

    proxy.handle_tool_response(&request_id, Some(json!(2)), None).await;
    assert_eq!(call.await.unwrap().unwrap(), json!(2));
}

#[tokio::test]
async fn send_failure_surfaces_and_clears_the_pending_entry() {
    let proxy = ToolProxy::new(Arc::new(NoClients));
    let err = proxy
        .execute_tool("ghost", "echo", Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::UnknownClient(_)));
}

#[tokio::test]
async fn remove_client_purges_tools_and_fails_in_flight_calls() {
    let outbound = Arc::new(RecordingOutbound::default());
    let proxy = Arc::new(ToolProxy::new(outbound.clone()));
    proxy.handle_tool_discovery("c1", vec![echo_definition()]).await;

    let call = {
        let proxy = proxy.clone();
        tokio::spawn(async move { proxy.execute_tool("c1", "echo", Map::new()).await })
    };
    loop {
        if outbound.last_request().await.is_some() {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }

    proxy.remove_client("c1").await;

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
    assert!(proxy.client_tools("c1").await.is_empty());
    assert!(proxy.clients().await.is_empty());
}
