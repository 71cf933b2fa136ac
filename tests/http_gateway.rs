use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use warp::Filter;
use warp::http::StatusCode;

use taskwatch::error::ErrorKind;
use taskwatch::gateway::{Gateway, HttpGateway};
use taskwatch::models::{SortDirection, TaskStatus, TaskType};

type Captured = Arc<Mutex<Vec<Value>>>;

fn task_json(id: &str) -> Value {
  json!({
    "id": id,
    "type": "WEB_SCRAPING",
    "status": "PROCESSING",
    "payload": "{\"url\":\"https://example.com\"}",
    "retryCount": 1,
    "maxRetries": 3,
    "priority": 8,
    "createdAt": "2024-05-01T10:15:30",
    "updatedAt": "2024-05-01T10:16:00.123",
    "startedAt": "2024-05-01T10:16:00.123",
    "workerId": "worker-1"
  })
}

async fn serve_stub(captured: Captured) -> SocketAddr {
  let tasks = warp::path!("api" / "tasks")
    .and(warp::get())
    .and(warp::query::<HashMap<String, String>>())
    .map(|query: HashMap<String, String>| {
      let page: u32 = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(0);
      let size: u32 = query.get("size").and_then(|s| s.parse().ok()).unwrap_or(20);
      warp::reply::json(&json!({
        "content": [task_json("t-42")],
        "totalElements": 41,
        "totalPages": 3,
        "size": size,
        "number": page,
        "first": page == 0,
        "last": false,
        "sortedBy": query.get("sortBy"),
        "direction": query.get("direction")
      }))
    });

  let task = warp::path!("api" / "tasks" / String)
    .and(warp::get())
    .map(|id: String| {
      if id == "missing" {
        let body = json!({
          "message": "Task not found: missing",
          "status": 404,
          "timestamp": "2024-05-01T10:20:00"
        });
        warp::reply::with_status(warp::reply::json(&body), StatusCode::NOT_FOUND)
      } else {
        warp::reply::with_status(warp::reply::json(&task_json(&id)), StatusCode::OK)
      }
    });

  let failed = warp::path!("api" / "tasks" / String / "failed")
    .and(warp::post())
    .and(warp::body::json())
    .map(move |id: String, body: Value| {
      captured.lock().unwrap().push(json!({ "id": id, "body": body }));
      warp::reply()
    });

  let statistics = warp::path!("api" / "statistics")
    .and(warp::get())
    .map(|| warp::reply::with_status("database unavailable", StatusCode::INTERNAL_SERVER_ERROR));

  let routes = tasks.or(task).or(failed).or(statistics);
  let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
  tokio::spawn(server);
  addr
}

fn gateway(addr: SocketAddr) -> HttpGateway {
  HttpGateway::new(&format!("http://{}/api/", addr), Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn listing_decodes_backend_page() {
  let addr = serve_stub(Captured::default()).await;
  let gateway = gateway(addr);
  assert_eq!(gateway.base_url(), format!("http://{}/api", addr));

  let page = gateway.fetch_tasks(1, 15, "createdAt", SortDirection::Desc).await.unwrap();
  assert_eq!(page.page, 1);
  assert_eq!(page.size, 15);
  assert_eq!(page.total_elements, 41);
  let task = &page.content[0];
  assert_eq!(task.task_type, TaskType::WebScraping);
  assert_eq!(task.status, TaskStatus::Processing);
  assert_eq!(task.worker_id.as_deref(), Some("worker-1"));
  assert_eq!(task.created_at.to_rfc3339(), "2024-05-01T10:15:30+00:00");
}

#[tokio::test]
async fn page_past_the_reported_total_is_still_returned() {
  let addr = serve_stub(Captured::default()).await;
  let page = gateway(addr).fetch_tasks(7, 20, "createdAt", SortDirection::Asc).await.unwrap();
  assert_eq!(page.page, 7);
  assert_eq!(page.total_pages, 3);
  assert!(!page.is_consistent());
  assert_eq!(page.content.len(), 1);
}

#[tokio::test]
async fn structured_error_body_becomes_application_error() {
  let addr = serve_stub(Captured::default()).await;
  let err = gateway(addr).fetch_task("missing").await.unwrap_err();
  match err {
    ErrorKind::Application(api) => {
      assert_eq!(api.status, 404);
      assert_eq!(api.message, "Task not found: missing");
    }
    other => panic!("expected application error, got {:?}", other),
  }
}

#[tokio::test]
async fn plain_text_error_keeps_status_and_body() {
  let addr = serve_stub(Captured::default()).await;
  let err = gateway(addr).fetch_statistics().await.unwrap_err();
  match err {
    ErrorKind::Application(api) => {
      assert_eq!(api.status, 500);
      assert_eq!(api.message, "database unavailable");
    }
    other => panic!("expected application error, got {:?}", other),
  }
}

#[tokio::test]
async fn mark_failed_posts_camel_case_body() {
  let captured = Captured::default();
  let addr = serve_stub(captured.clone()).await;
  gateway(addr).mark_failed("t-42", "disk full", true).await.unwrap();

  let requests = captured.lock().unwrap();
  assert_eq!(
    requests.as_slice(),
    &[json!({
      "id": "t-42",
      "body": { "errorMessage": "disk full", "shouldRetry": true }
    })]
  );
}

#[tokio::test]
async fn refused_connection_is_a_transport_error() {
  let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
  let err = gateway(addr).fetch_workers().await.unwrap_err();
  assert!(matches!(err, ErrorKind::Transport(_)));
  assert!(err.is_retryable());
}
