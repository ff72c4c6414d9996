//! HttpControlPlane tests against a hand-rolled HTTP/1.1 mock server.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;

use aoi_sandbox::control::{SandboxControlPlane, SessionSpec, SessionStatus};
use aoi_sandbox::errors::ControlPlaneError;
use aoi_sandbox::http::HttpControlPlane;
use aoi_sandbox::types::ExecuteCodeReq;

/// Serves exactly one connection with a canned response and asserts the
/// request line starts with `expected_request`.
fn spawn_single_response_server(
    expected_request: &'static str,
    status_line: &'static str,
    body: &'static str,
) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let mut buf = [0u8; 8192];
        let n = stream.read(&mut buf).expect("read request");
        let request = String::from_utf8_lossy(&buf[..n]).to_string();
        assert!(
            request.starts_with(expected_request),
            "unexpected request line: {request}"
        );

        let response = format!(
            "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).expect("write response");
    });

    format!("http://{addr}/")
}

fn spec(session_id: &str) -> SessionSpec {
    SessionSpec {
        session_id: session_id.to_string(),
        template_id: "code-runner".to_string(),
        cpu: 1.0,
        memory_mb: 512,
        disk_gb: 1,
        timeout_secs: 60,
    }
}

#[tokio::test]
async fn query_session_decodes_status_detail() {
    let base = spawn_single_response_server(
        "GET /v1/sessions/sess_aoi_0",
        "HTTP/1.1 200 OK",
        r#"{"status":"running","message":null}"#,
    );
    let plane = HttpControlPlane::new(&base).unwrap();

    let detail = plane.query_session("sess_aoi_0").await.unwrap().unwrap();
    assert_eq!(detail.status, SessionStatus::Running);
    assert!(detail.message.is_none());
}

#[tokio::test]
async fn query_session_maps_404_to_none() {
    let base = spawn_single_response_server(
        "GET /v1/sessions/sess_aoi_7",
        "HTTP/1.1 404 Not Found",
        r#"{"error":"no such session"}"#,
    );
    let plane = HttpControlPlane::new(&base).unwrap();

    let detail = plane.query_session("sess_aoi_7").await.unwrap();
    assert!(detail.is_none());
}

#[tokio::test]
async fn create_session_posts_spec() {
    let base = spawn_single_response_server("POST /v1/sessions", "HTTP/1.1 201 Created", "{}");
    let plane = HttpControlPlane::new(&base).unwrap();

    plane.create_session(&spec("sess_aoi_0")).await.unwrap();
}

#[tokio::test]
async fn create_session_surfaces_server_error_body() {
    let base = spawn_single_response_server(
        "POST /v1/sessions",
        "HTTP/1.1 500 Internal Server Error",
        "no capacity",
    );
    let plane = HttpControlPlane::new(&base).unwrap();

    let error = plane.create_session(&spec("sess_aoi_0")).await.unwrap_err();
    match error {
        ControlPlaneError::UnexpectedStatus { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "no capacity");
        }
        other => panic!("expected UnexpectedStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn delete_session_tolerates_missing_session() {
    let base = spawn_single_response_server(
        "DELETE /v1/sessions/sess_aoi_2",
        "HTTP/1.1 404 Not Found",
        "",
    );
    let plane = HttpControlPlane::new(&base).unwrap();

    plane.delete_session("sess_aoi_2").await.unwrap();
}

#[tokio::test]
async fn execute_code_decodes_response() {
    let base = spawn_single_response_server(
        "POST /v1/sessions/sess_aoi_0/execute",
        "HTTP/1.1 200 OK",
        r#"{"stdout":"hello","stderr":"","result":{"ok":true},"metrics":{"duration_ms":12}}"#,
    );
    let plane = HttpControlPlane::new(&base).unwrap();

    let response = plane
        .execute_code("sess_aoi_0", &ExecuteCodeReq::default())
        .await
        .unwrap();
    assert_eq!(response.stdout, "hello");
    assert_eq!(response.result["ok"], serde_json::json!(true));
}
