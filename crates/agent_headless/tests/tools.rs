use std::fs;
use std::sync::atomic::Ordering;

use agent_api::{new_cancel_signal, ToolReturnStatus};
use agent_headless::tools::{LocalTools, ToolCall};
use pretty_assertions::assert_eq;
use serde_json::json;
use turn_engine::{ApprovedCall, ExecutionBatch, ToolCatalog};

fn workspace() -> (tempfile::TempDir, LocalTools) {
    let dir = tempfile::tempdir().expect("tempdir");
    let tools = LocalTools::new(dir.path()).expect("workspace");
    (dir, tools)
}

fn call(id: &str, tool: &str, args: serde_json::Value) -> ApprovedCall {
    ApprovedCall {
        tool_call_id: id.to_string(),
        tool_name: tool.to_string(),
        args,
    }
}

#[test]
fn write_read_and_edit_stay_inside_the_workspace() {
    let (dir, tools) = workspace();

    let written = tools.run(ToolCall::Write {
        file_path: "notes/todo.txt".to_string(),
        content: "alpha beta".to_string(),
    });
    assert!(written.ok, "{}", written.content);
    assert_eq!(written.content, "Wrote notes/todo.txt");

    let edited = tools.run(ToolCall::Edit {
        file_path: "notes/todo.txt".to_string(),
        old_string: "beta".to_string(),
        new_string: "gamma".to_string(),
    });
    assert!(edited.ok, "{}", edited.content);

    let read = tools.run(ToolCall::Read {
        file_path: dir.path().join("notes/todo.txt").display().to_string(),
    });
    assert!(read.ok);
    assert_eq!(read.content, "alpha gamma");
}

#[test]
fn edit_requires_a_unique_match() {
    let (dir, tools) = workspace();
    fs::write(dir.path().join("a.txt"), "x x").expect("seed");

    let output = tools.run(ToolCall::Edit {
        file_path: "a.txt".to_string(),
        old_string: "x".to_string(),
        new_string: "y".to_string(),
    });
    assert!(!output.ok);
    assert!(output.content.contains("found 2"));
}

#[test]
fn paths_outside_the_workspace_are_rejected() {
    let (_dir, tools) = workspace();
    let outside = tempfile::tempdir().expect("outside");
    fs::write(outside.path().join("secret.txt"), "s").expect("seed");

    let read = tools.run(ToolCall::Read {
        file_path: outside.path().join("secret.txt").display().to_string(),
    });
    assert!(!read.ok);
    assert!(read.content.contains("Path escapes workspace root"));

    let write = tools.run(ToolCall::Write {
        file_path: "../escape.txt".to_string(),
        content: "nope".to_string(),
    });
    assert!(!write.ok);
}

#[test]
fn bash_reports_status_and_streams() {
    let (dir, tools) = workspace();
    fs::write(dir.path().join("marker"), "").expect("seed");

    let output = tools.run(ToolCall::Bash {
        command: "ls; echo oops >&2; exit 3".to_string(),
        timeout_sec: Some(10),
        cwd: None,
    });
    assert!(!output.ok);
    assert!(output.content.starts_with("status: exit_code=3"));
    assert!(output.stdout.as_deref().is_some_and(|stdout| stdout.contains("marker")));
    assert!(output.stderr.as_deref().is_some_and(|stderr| stderr.contains("oops")));
}

#[test]
fn bash_output_is_truncated() {
    let (_dir, tools) = workspace();
    let tools = tools.with_bash_max_output_bytes(64);

    let output = tools.run(ToolCall::Bash {
        command: "yes | head -n 200".to_string(),
        timeout_sec: Some(10),
        cwd: None,
    });
    assert!(output.ok);
    assert!(output.content.ends_with("[truncated]"));
}

#[test]
fn bash_times_out() {
    let (_dir, tools) = workspace();

    let output = tools.run(ToolCall::Bash {
        command: "sleep 5".to_string(),
        timeout_sec: Some(1),
        cwd: None,
    });
    assert!(!output.ok);
    assert!(output.content.contains("timeout after 1s"));
}

#[tokio::test]
async fn batch_runs_calls_in_order_and_reports_failures_per_call() {
    let (dir, tools) = workspace();

    let results = tools
        .execute(
            vec![
                call("c1", "Write", json!({"file_path": "a.txt", "content": "1"})),
                call("c2", "Read", json!({"file_path": "a.txt"})),
                call("c3", "Search", json!({})),
            ],
            &new_cancel_signal(),
        )
        .await;

    assert_eq!(
        results.iter().map(|result| result.tool_call_id.as_str()).collect::<Vec<_>>(),
        vec!["c1", "c2", "c3"]
    );
    assert_eq!(results[1].output, "1");
    assert_eq!(results[2].status, ToolReturnStatus::Error);
    assert!(dir.path().join("a.txt").exists());
}

#[tokio::test]
async fn cancelled_batches_skip_remaining_calls() {
    let (dir, tools) = workspace();
    let cancel = new_cancel_signal();
    cancel.store(true, Ordering::SeqCst);

    let results = tools
        .execute(
            vec![call("c1", "Write", json!({"file_path": "a.txt", "content": "1"}))],
            &cancel,
        )
        .await;

    assert_eq!(results[0].status, ToolReturnStatus::Error);
    assert!(!dir.path().join("a.txt").exists());
}

#[test]
fn catalog_lists_builtin_tools() {
    let (_dir, tools) = workspace();
    assert_eq!(tools.tool_names(), vec!["Bash", "Read", "Write", "Edit"]);
    assert_eq!(
        tools.input_schema("Write").expect("schema")["required"],
        json!(["file_path", "content"])
    );
}
