//! Interpretation of the queue server's JSON replies.
//!
//! Replies are read as loose JSON rather than fixed structs: the server answers
//! polls with several shapes (`{output}`, `{error}`, `{status, log}` and its own
//! stored-task record), and the client only needs a few fields out of each.

use crate::error::LifecycleError;
use crate::task::{TaskIdentity, TaskStatus};
use serde_json::Value;

/// Status strings after which the server will not change the task again.
const FAILED_STATUSES: [&str; 2] = ["failed", "canceled"];
const COMPLETED_STATUS: &str = "completed";

/// Extract the message of an explicit `error` field, if the reply carries one.
///
/// Accepts `{error: {message}}` and the looser `{error: "..."}`.
pub fn error_message(body: &Value) -> Option<String> {
    match non_null(body, "error")? {
        Value::String(message) => Some(message.clone()),
        Value::Object(map) => Some(
            map.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
        ),
        other => Some(other.to_string()),
    }
}

/// Interpret the reply to a fire-and-forget submission.
pub fn identity_from_submit_reply(body: &Value) -> Result<TaskIdentity, LifecycleError> {
    if let Some(message) = error_message(body) {
        return Err(LifecycleError::Server(message));
    }

    let identity = body
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value::<TaskIdentity>(id).ok())
        .filter(TaskIdentity::is_well_formed);

    identity.ok_or_else(|| {
        LifecycleError::Protocol(format!(
            "submission reply did not contain a task identity: {}",
            preview(body)
        ))
    })
}

/// Interpret one poll reply.
///
/// Priority: `output`, then `result`, then `error`, then `log`, then `status`.
/// A reply with none of these is a protocol error, which ends the loop.
pub fn status_from_poll_reply(body: &Value) -> Result<TaskStatus, LifecycleError> {
    if !body.is_object() {
        return Err(LifecycleError::Protocol(format!(
            "poll reply is not an object: {}",
            preview(body)
        )));
    }

    let status = body.get("status").and_then(Value::as_str);
    let failed_status = status.is_some_and(|s| FAILED_STATUSES.contains(&s));

    if let Some(output) = non_null(body, "output") {
        return Ok(TaskStatus::Completed {
            output: output.clone(),
        });
    }

    if let Some(result) = non_null(body, "result") {
        if failed_status {
            let error = error_message(body).unwrap_or_else(|| failure_from_result(result));
            return Ok(TaskStatus::Failed { error });
        }
        return Ok(TaskStatus::Completed {
            output: result.clone(),
        });
    }

    if let Some(error) = error_message(body) {
        return Ok(TaskStatus::Failed { error });
    }

    if failed_status {
        return Ok(TaskStatus::Failed {
            error: format!("task {}", status.unwrap_or("failed")),
        });
    }
    if status == Some(COMPLETED_STATUS) {
        return Ok(TaskStatus::Completed {
            output: Value::Null,
        });
    }

    let log = non_null(body, "log").map(|log| match log {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    });
    let stage = status
        .map(str::to_string)
        .or_else(|| body.get("stage").and_then(Value::as_str).map(str::to_string));

    if log.is_none() && stage.is_none() {
        return Err(LifecycleError::Protocol(format!(
            "unrecognized poll reply: {}",
            preview(body)
        )));
    }

    Ok(TaskStatus::Pending { stage, log })
}

/// Interpret the reply of a blocking submission, which must be terminal.
pub fn status_from_blocking_reply(body: &Value) -> Result<TaskStatus, LifecycleError> {
    match status_from_poll_reply(body)? {
        TaskStatus::Pending { .. } => Err(LifecycleError::Protocol(format!(
            "blocking submission returned without a result: {}",
            preview(body)
        ))),
        terminal => Ok(terminal),
    }
}

/// Interpret the reply listing online capabilities.
pub fn capabilities_from_reply(body: &Value) -> Result<Vec<String>, LifecycleError> {
    if let Some(message) = error_message(body) {
        return Err(LifecycleError::Server(message));
    }
    let Some(items) = body.as_array() else {
        return Err(LifecycleError::Protocol(format!(
            "capability list is not an array: {}",
            preview(body)
        )));
    };
    Ok(items
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect())
}

/// Outputs are often JSON documents sent as strings; decode them when possible.
pub fn decode_output(output: &Value) -> Value {
    match output {
        Value::String(text) => serde_json::from_str(text).unwrap_or_else(|_| output.clone()),
        other => other.clone(),
    }
}

fn failure_from_result(result: &Value) -> String {
    let decoded = decode_output(result);
    if let Some(message) = error_message(&decoded) {
        return message;
    }
    if let Some(stderr) = decoded.get("stderr").and_then(Value::as_str) {
        if !stderr.trim().is_empty() {
            return stderr.trim_end().to_string();
        }
    }
    match decoded {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

fn non_null<'a>(body: &'a Value, key: &str) -> Option<&'a Value> {
    body.get(key).filter(|v| !v.is_null())
}

fn preview(body: &Value) -> String {
    let mut text = body.to_string();
    if text.len() > 200 {
        let mut end = 200;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
        text.push_str("...");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_submit_reply_with_identity() {
        let body = json!({
            "id": {"cap": "shell::bash", "id": "abc"},
            "capability": "shell::bash",
            "status": "pending",
            "message": "Added to tasks queue"
        });
        let id = identity_from_submit_reply(&body).unwrap();
        assert_eq!(id, TaskIdentity::new("shell::bash", "abc"));
    }

    #[test]
    fn test_submit_reply_error_and_malformed() {
        let err = identity_from_submit_reply(&json!({"error": {"message": "no key"}})).unwrap_err();
        assert!(matches!(err, LifecycleError::Server(ref m) if m == "no key"));

        let err = identity_from_submit_reply(&json!({})).unwrap_err();
        assert!(matches!(err, LifecycleError::Protocol(_)));

        let err = identity_from_submit_reply(&json!({"id": {"cap": "", "id": "abc"}})).unwrap_err();
        assert!(matches!(err, LifecycleError::Protocol(_)));

        let err = identity_from_submit_reply(&json!({"id": "abc"})).unwrap_err();
        assert!(matches!(err, LifecycleError::Protocol(_)));
    }

    #[test]
    fn test_poll_priority_order() {
        let status = status_from_poll_reply(&json!({"output": "x", "log": "l", "status": "running"})).unwrap();
        assert_eq!(status, TaskStatus::Completed { output: json!("x") });

        let status = status_from_poll_reply(&json!({"error": {"message": "boom"}, "status": "running"})).unwrap();
        assert_eq!(status, TaskStatus::Failed { error: "boom".to_string() });

        let status = status_from_poll_reply(&json!({"status": "running", "log": "step 1"})).unwrap();
        assert_eq!(
            status,
            TaskStatus::Pending {
                stage: Some("running".to_string()),
                log: Some("step 1".to_string())
            }
        );

        let status = status_from_poll_reply(&json!({"status": "pending"})).unwrap();
        assert_eq!(
            status,
            TaskStatus::Pending {
                stage: Some("pending".to_string()),
                log: None
            }
        );
    }

    #[test]
    fn test_poll_stored_task_shape() {
        let status = status_from_poll_reply(&json!({
            "id": {"cap": "shell::bash", "id": "abc"},
            "status": "completed",
            "result": {"stdout": "hi\n", "stderr": ""}
        }))
        .unwrap();
        assert_eq!(
            status,
            TaskStatus::Completed {
                output: json!({"stdout": "hi\n", "stderr": ""})
            }
        );

        let status = status_from_poll_reply(&json!({
            "status": "failed",
            "result": {"stdout": "", "stderr": "command not found\n", "return_code": 127}
        }))
        .unwrap();
        assert_eq!(
            status,
            TaskStatus::Failed {
                error: "command not found".to_string()
            }
        );

        // A stored record that has not produced anything yet.
        let status = status_from_poll_reply(&json!({"status": "queued", "result": null})).unwrap();
        assert!(!status.is_terminal());

        let status = status_from_poll_reply(&json!({"status": "canceled"})).unwrap();
        assert!(matches!(status, TaskStatus::Failed { .. }));

        let status = status_from_poll_reply(&json!({"status": "completed"})).unwrap();
        assert_eq!(status, TaskStatus::Completed { output: Value::Null });
    }

    #[test]
    fn test_poll_unrecognized_reply() {
        assert!(status_from_poll_reply(&json!({})).is_err());
        assert!(status_from_poll_reply(&json!([1, 2])).is_err());
        assert!(status_from_poll_reply(&json!({"output": null})).is_err());
    }

    #[test]
    fn test_blocking_reply() {
        let status = status_from_blocking_reply(&json!({"result": {"message": {"content": "ok"}}})).unwrap();
        assert_eq!(
            status,
            TaskStatus::Completed {
                output: json!({"message": {"content": "ok"}})
            }
        );

        let err = status_from_blocking_reply(&json!({"status": "running"})).unwrap_err();
        assert!(matches!(err, LifecycleError::Protocol(_)));
    }

    #[test]
    fn test_capabilities_reply() {
        let caps = capabilities_from_reply(&json!(["shell::bash", "LLM::mistral", 7])).unwrap();
        assert_eq!(caps, vec!["shell::bash", "LLM::mistral"]);
        assert!(capabilities_from_reply(&json!({"error": "denied"})).is_err());
        assert!(capabilities_from_reply(&json!({"caps": []})).is_err());
    }

    #[test]
    fn test_decode_output() {
        assert_eq!(
            decode_output(&json!("{\"stdout\":\"hi\\n\"}")),
            json!({"stdout": "hi\n"})
        );
        assert_eq!(decode_output(&json!("plain text")), json!("plain text"));
        assert_eq!(decode_output(&json!({"a": 1})), json!({"a": 1}));
    }
}
