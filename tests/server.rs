//! End-to-end over a real socket.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::net::TcpListener;

use llm_generator::api::{router, AppState};
use llm_generator::inference::{EngineError, TextGenerator, WorkerPool};

struct Suffix;

impl TextGenerator for Suffix {
    fn generate(&self, prompt: &str, _: usize) -> Result<String, EngineError> {
        Ok(format!("{prompt}, world"))
    }
}

async fn spawn_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(AppState::new(Arc::new(Suffix), WorkerPool::new(2), "s3cret"));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn serves_health_and_generate_over_http() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, json!({"status": "ok", "service": "LLM-Generator"}));

    let res = client
        .post(format!("{base}/generate"))
        .header("x-api-key", "s3cret")
        .json(&json!({"prompt": "Hello", "max_new_tokens": 10}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({"generated_text": "Hello, world"}));

    let res = client
        .post(format!("{base}/generate"))
        .json(&json!({"prompt": "Hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::UNAUTHORIZED);
}
