use futures::StreamExt;
use offload_core::{
    protocol, Endpoints, HistoryStore, HttpTransport, LifecycleError, LlmTemplate, LoopPhase,
    ShellTemplate, TaskIdentity, TaskLifecycleClient, TaskStatus, TaskTemplate, TaskUpdates,
    TransportError,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, body_partial_json, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> (TaskLifecycleClient, TaskUpdates) {
    let transport = Arc::new(HttpTransport::new(server.uri(), Endpoints::default()));
    let (client, updates) =
        TaskLifecycleClient::new(transport, "secret", HistoryStore::in_memory());
    (client.with_poll_interval(Duration::from_millis(50)), updates)
}

async fn wait_terminal(updates: &mut TaskUpdates) -> TaskStatus {
    let wait = async {
        loop {
            let update = updates.next().await.expect("update stream ended");
            if update.status.is_terminal() {
                return update.status;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("task never reached a terminal status")
}

#[tokio::test]
async fn test_shell_task_round_trip() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/task/submit"))
        .and(body_json(json!({
            "capability": "shell::bash",
            "urgent": false,
            "payload": {"command": "bash -c 'echo hi'"},
            "apiKey": "secret"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": {"cap": "shell::bash", "id": "abc"},
            "capability": "shell::bash",
            "status": "queued",
            "message": "Task submitted"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path_regex("^/api/task/poll/[^/]+/abc$"))
        .and(body_json(json!({"apiKey": "secret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "pending"})))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path_regex("^/api/task/poll/[^/]+/abc$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"output": "{\"stdout\":\"hi\\n\"}"})),
        )
        .with_priority(2)
        .mount(&server)
        .await;

    let (mut client, mut updates) = client_for(&server);
    let template = ShellTemplate::default();

    let task = client.submit_and_watch(&template, "echo hi").await.unwrap();
    assert_eq!(task, TaskIdentity::new("shell::bash", "abc"));

    let status = wait_terminal(&mut updates).await;
    let TaskStatus::Completed { output } = status else {
        panic!("expected completion, got {status:?}");
    };
    assert_eq!(protocol::decode_output(&output), json!({"stdout": "hi\n"}));
    assert_eq!(template.render_output(&output), "hi\n");
    assert_eq!(client.phase(), LoopPhase::Completed);
    assert_eq!(client.history().issued().entries(), &["shell::bash/abc"]);
}

#[tokio::test]
async fn test_blocking_prompt() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/task/submit_blocking"))
        .and(body_partial_json(json!({
            "capability": "LLM::dolphin-mistral",
            "urgent": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "result": {"message": {"content": "ok"}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (mut client, _updates) = client_for(&server);
    let template = LlmTemplate::new("dolphin-mistral");

    let status = client.submit_blocking(&template, "say ok").await.unwrap();
    let TaskStatus::Completed { output } = status else {
        panic!("expected completion, got {status:?}");
    };
    assert_eq!(template.render_output(&output), "ok");
    assert_eq!(client.phase(), LoopPhase::Idle);
}

#[tokio::test]
async fn test_server_error_body_on_submit() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/task/submit"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {
                "type": "Forbidden",
                "message": "API key does not have access to shell::bash",
                "status": 403
            }
        })))
        .mount(&server)
        .await;

    let (mut client, _updates) = client_for(&server);
    let err = client
        .submit_and_watch(&ShellTemplate::default(), "ls")
        .await
        .unwrap_err();

    match err {
        LifecycleError::Server(message) => assert!(message.contains("does not have access")),
        other => panic!("expected server error, got {other:?}"),
    }
    assert_eq!(client.phase(), LoopPhase::Idle);
    assert!(client.history().issued().is_empty());
}

#[tokio::test]
async fn test_poll_failure_is_terminal() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/task/submit"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": {"cap": "debug::echo", "id": "x1"}})),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path_regex("^/api/task/poll/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .expect(1)
        .mount(&server)
        .await;

    let (mut client, mut updates) = client_for(&server);
    let template = offload_core::RawTemplate::new("debug::echo");
    client.submit_and_watch(&template, "{}").await.unwrap();

    let status = wait_terminal(&mut updates).await;
    let TaskStatus::Failed { error } = status else {
        panic!("expected failure, got {status:?}");
    };
    assert!(error.contains("500"), "unexpected error: {error}");
    assert_eq!(client.phase(), LoopPhase::Failed);

    // No retries after a failed cycle.
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_undecodable_reply() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/task/submit"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let (mut client, _updates) = client_for(&server);
    let err = client
        .submit(&ShellTemplate::default(), "ls")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Transport(TransportError::Decode { .. })
    ));
}

#[tokio::test]
async fn test_capabilities_listing() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/capabilities/list/online"))
        .and(body_json(json!({"apiKey": "secret"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!(["shell::bash", "LLM::dolphin-mistral", "TTS::kokoro"])),
        )
        .mount(&server)
        .await;

    let (client, _updates) = client_for(&server);
    let caps = client.capabilities().await.unwrap();
    assert_eq!(caps, vec!["shell::bash", "LLM::dolphin-mistral", "TTS::kokoro"]);
}
