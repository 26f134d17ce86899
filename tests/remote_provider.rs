use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use notes_recall::builder::{build_index, BuildContext};
use notes_recall::config::{Config, EmbeddingConfig};
use notes_recall::embedding::{create_provider, EmbeddingProvider, ProviderKind};
use notes_recall::error::RecallError;
use notes_recall::search::{search, SearchQuery};

#[derive(Clone, Copy)]
enum Behavior {
    Ok,
    DropOne,
    WrongDim,
    BadRequest,
    UnavailableOnce,
}

struct Mock {
    behavior: Behavior,
    calls: AtomicUsize,
    last_auth: Mutex<Option<String>>,
    last_body: Mutex<Option<Value>>,
}

async fn embeddings(
    State(mock): State<Arc<Mock>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let call = mock.calls.fetch_add(1, Ordering::SeqCst);
    *mock.last_auth.lock().unwrap() = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    *mock.last_body.lock().unwrap() = Some(body.clone());

    match mock.behavior {
        Behavior::BadRequest => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": {"message": "bad model"}})),
            )
        }
        Behavior::UnavailableOnce if call == 0 => {
            return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "busy"})))
        }
        _ => {}
    }

    let inputs = body["input"].as_array().cloned().unwrap_or_default();
    let mut dims = body["dimensions"].as_u64().unwrap_or(4) as usize;
    if matches!(mock.behavior, Behavior::WrongDim) {
        dims += 1;
    }

    let mut data: Vec<Value> = inputs
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let len = text.as_str().unwrap_or("").len() as f32;
            let mut v = vec![0.0f32; dims];
            v[0] = len + 1.0;
            v[(i + 1) % dims] += 1.0;
            json!({"object": "embedding", "index": i, "embedding": v})
        })
        .collect();
    if matches!(mock.behavior, Behavior::DropOne) {
        data.pop();
    }
    data.reverse();

    (StatusCode::OK, Json(json!({"object": "list", "data": data})))
}

async fn spawn_mock(behavior: Behavior) -> (String, Arc<Mock>) {
    let mock = Arc::new(Mock {
        behavior,
        calls: AtomicUsize::new(0),
        last_auth: Mutex::new(None),
        last_body: Mutex::new(None),
    });
    let app = Router::new()
        .route("/v1/embeddings", post(embeddings))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/v1", addr), mock)
}

fn embedding_config(base_url: &str) -> EmbeddingConfig {
    EmbeddingConfig {
        base_url: base_url.to_string(),
        api_key: Some("test-key".into()),
        max_retries: 1,
        timeout_secs: 5,
        ..Default::default()
    }
}

fn provider(base_url: &str, dims: usize) -> Box<dyn EmbeddingProvider> {
    create_provider(
        ProviderKind::OpenAi,
        "text-embedding-3-small",
        dims,
        &embedding_config(base_url),
    )
    .unwrap()
}

fn texts(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("text number {}", i)).collect()
}

#[tokio::test]
async fn embeds_in_input_order_with_bearer_auth() {
    let (url, mock) = spawn_mock(Behavior::Ok).await;
    let provider = provider(&url, 4);

    let vectors = provider
        .embed_batch(&texts(3), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(vectors.len(), 3);
    for (i, v) in vectors.iter().enumerate() {
        assert_eq!(v.len(), 4);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        // the mock marks input i in bucket i + 1
        assert!(v[(i + 1) % 4] > 0.0);
    }

    assert_eq!(mock.last_auth.lock().unwrap().as_deref(), Some("Bearer test-key"));
    let body = mock.last_body.lock().unwrap().clone().unwrap();
    assert_eq!(body["model"], "text-embedding-3-small");
    assert_eq!(body["dimensions"], 4);
    assert_eq!(body["input"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn count_mismatch_is_a_provider_error() {
    let (url, _) = spawn_mock(Behavior::DropOne).await;
    let err = provider(&url, 4)
        .embed_batch(&texts(2), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RecallError::Provider(_)), "{:?}", err);
}

#[tokio::test]
async fn dimension_mismatch_is_a_provider_error() {
    let (url, _) = spawn_mock(Behavior::WrongDim).await;
    let err = provider(&url, 4)
        .embed_batch(&texts(2), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("expected 4"), "{}", err);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let (url, mock) = spawn_mock(Behavior::BadRequest).await;
    let err = provider(&url, 4)
        .embed_batch(&texts(1), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RecallError::Provider(_)));
    assert!(err.to_string().contains("400"));
    assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn server_errors_are_retried() {
    let (url, mock) = spawn_mock(Behavior::UnavailableOnce).await;
    let vectors = provider(&url, 4)
        .embed_batch(&texts(2), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(vectors.len(), 2);
    assert_eq!(mock.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn canceled_token_sends_nothing() {
    let (url, mock) = spawn_mock(Behavior::Ok).await;
    let token = CancellationToken::new();
    token.cancel();
    let err = provider(&url, 4).embed_batch(&texts(2), &token).await.unwrap_err();
    assert!(err.is_canceled());
    assert_eq!(mock.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn missing_credential_is_a_config_error() {
    let config = EmbeddingConfig {
        api_key: None,
        api_key_env: "RECALL_REMOTE_TEST_NO_SUCH_VAR".into(),
        ..Default::default()
    };
    let err = create_provider(ProviderKind::OpenAi, "text-embedding-3-small", 8, &config)
        .err()
        .unwrap();
    assert!(matches!(err, RecallError::Config(_)));
}

#[tokio::test]
async fn build_and_search_through_remote_provider() {
    let (url, mock) = spawn_mock(Behavior::Ok).await;
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("NOTES.md"), "short\n").unwrap();
    std::fs::write(
        tmp.path().join("TASKS.md"),
        "a considerably longer task description line\n",
    )
    .unwrap();

    let mut config = Config::default();
    config.build.provider = "openai".into();
    config.build.dim = 8;
    config.embedding = embedding_config(&url);

    let (meta, index) = build_index(tmp.path(), &config, &BuildContext::default())
        .await
        .unwrap();
    assert_eq!(meta.provider, "openai");
    assert_eq!(meta.model, "text-embedding-3-small");
    assert_eq!(meta.embedded_items, 2);
    assert_eq!(index.items.len(), 2);
    let calls_after_build = mock.calls.load(Ordering::SeqCst);
    assert_eq!(calls_after_build, 1);

    let hits = search(
        tmp.path(),
        &config,
        &SearchQuery {
            q: "short".into(),
            k: 2,
            min_score: -1.0,
        },
    )
    .await
    .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(mock.calls.load(Ordering::SeqCst), calls_after_build + 1);
}
