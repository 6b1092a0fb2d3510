use axum::{
    body::Body,
    extract::RawQuery,
    http::{Request, StatusCode},
    Json, Router,
};
use serde_json::{json, Value};
use std::io::{self, BufRead, Cursor, Read};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use turbidity_gateway::{
    analysis::predictor::{Regressor, RegressionModel, StandardScaler, FEATURE_COUNT},
    create_app, AppState, GeminiClient, GeminiConfig, InsightGenerator, LifespanPredictor,
    ProcessParameters, ReadingStore, Result, SerialReader, SystemError, TextService, WebConfig,
    FALLBACK_ANALYSIS,
};

/// Linear model predicting `1000 - 20 * turbidity` hours on unscaled inputs.
fn linear_predictor() -> Arc<LifespanPredictor> {
    let scaler = StandardScaler {
        mean: vec![0.0; FEATURE_COUNT],
        scale: vec![1.0; FEATURE_COUNT],
    };
    let model = RegressionModel::Linear {
        coefficients: vec![0.0, -20.0, 0.0, 0.0, 0.0],
        intercept: 1000.0,
    };
    Arc::new(
        LifespanPredictor::new(scaler, Box::new(model), ProcessParameters::default())
            .expect("Should build predictor"),
    )
}

struct FailingModel;

impl Regressor for FailingModel {
    fn feature_count(&self) -> usize {
        FEATURE_COUNT
    }

    fn predict(&self, _features: &[f64]) -> Result<f64> {
        Err(SystemError::model_error("estimator is not fitted"))
    }
}

fn failing_predictor() -> Arc<LifespanPredictor> {
    let scaler = StandardScaler {
        mean: vec![0.0; FEATURE_COUNT],
        scale: vec![1.0; FEATURE_COUNT],
    };
    Arc::new(
        LifespanPredictor::new(scaler, Box::new(FailingModel), ProcessParameters::default())
            .expect("Should build predictor"),
    )
}

/// Text service that always fails with an internal (non-upstream) error.
struct BrokenService;

#[async_trait::async_trait]
impl TextService for BrokenService {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(SystemError::internal_error("prompt encoder crashed"))
    }
}

/// Gemini client pointed at a port nothing listens on.
fn unreachable_gemini() -> Arc<dyn TextService> {
    let config = GeminiConfig::default()
        .with_api_key(Some("test-key".to_string()))
        .with_base_url("http://127.0.0.1:1");
    Arc::new(GeminiClient::new(config))
}

fn app_with(
    store: Arc<ReadingStore>,
    service: Arc<dyn TextService>,
    predictor: Option<Arc<LifespanPredictor>>,
) -> Router {
    let insights = InsightGenerator::new(service, predictor.clone(), ProcessParameters::default());
    let state = AppState::new(store, predictor, Arc::new(insights));
    create_app(&WebConfig::default(), state).expect("Should create app")
}

fn default_app() -> Router {
    app_with(
        Arc::new(ReadingStore::new()),
        unreachable_gemini(),
        Some(linear_predictor()),
    )
}

/// Requests captured by the fake Gemini server: (query, body).
type Captured = Arc<Mutex<Vec<(Option<String>, Value)>>>;

/// Start a local stand-in for the Gemini API and return its base URL.
async fn fake_gemini(status: StatusCode, reply: Value) -> (String, Captured) {
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let sink = captured.clone();

    let app = Router::new().fallback(move |RawQuery(query): RawQuery, Json(body): Json<Value>| {
        let sink = sink.clone();
        let reply = reply.clone();
        async move {
            sink.lock().unwrap().push((query, body));
            (status, Json(reply))
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Should bind fake Gemini server");
    let addr = listener.local_addr().expect("Should have local address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Fake Gemini server failed");
    });

    (format!("http://{}", addr), captured)
}

fn gemini_at(base_url: &str) -> Arc<dyn TextService> {
    let config = GeminiConfig::default()
        .with_api_key(Some("test-key".to_string()))
        .with_base_url(base_url);
    Arc::new(GeminiClient::new(config))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("Should build request")
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("Should build request")
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.expect("Request should complete");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Should read body");
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn ten_samples() -> Vec<Value> {
    (1..=10).map(|i| json!(i as f64 * 0.5)).collect()
}

#[tokio::test]
async fn test_read_defaults_to_zero() {
    let (status, body) = send(default_app(), get("/data")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "value": 0.0 }));
}

#[tokio::test]
async fn test_read_is_idempotent() {
    let store = Arc::new(ReadingStore::new());
    store.write(4.2);
    let app = app_with(store, unreachable_gemini(), None);

    let (_, first) = send(app.clone(), get("/data")).await;
    let (_, second) = send(app, get("/data")).await;
    assert_eq!(first, json!({ "value": 4.2 }));
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_serial_lines_reach_read_endpoint() {
    let store = Arc::new(ReadingStore::new());
    let input = "Booting sensor\nTurbidity: 3.75\nTurbidity: ???\nVoltage: 4.2\n";
    let reader = SerialReader::new(Cursor::new(input.as_bytes().to_vec()), store.clone());

    let handle = reader
        .spawn(CancellationToken::new())
        .expect("Should spawn reader");
    tokio::task::spawn_blocking(move || handle.shutdown())
        .await
        .expect("Reader should join");

    let app = app_with(store, unreachable_gemini(), None);
    let (_, body) = send(app, get("/data")).await;
    assert_eq!(body, json!({ "value": 3.75 }));
}

/// Source that behaves like an idle serial port: every read times out.
struct IdlePort;

impl Read for IdlePort {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        std::thread::sleep(Duration::from_millis(10));
        Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
    }
}

impl BufRead for IdlePort {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        std::thread::sleep(Duration::from_millis(10));
        Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
    }

    fn consume(&mut self, _amt: usize) {}
}

#[tokio::test]
async fn test_reader_stops_on_cancel() {
    let store = Arc::new(ReadingStore::new());
    let token = CancellationToken::new();
    let handle = SerialReader::new(IdlePort, store.clone())
        .spawn(token.clone())
        .expect("Should spawn reader");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished(), "Idle reader should keep polling");

    let joined = tokio::time::timeout(
        Duration::from_secs(5),
        tokio::task::spawn_blocking(move || handle.shutdown()),
    )
    .await;
    assert!(joined.is_ok(), "Reader should stop after cancellation");
    assert!(!store.has_reading());
}

#[tokio::test]
async fn test_predict_requires_turbidity() {
    let (status, body) = send(default_app(), post_json("/predict", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Turbidity value is required" }));

    let (status, body) =
        send(default_app(), post_json("/predict", json!({ "turbidity": null }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Turbidity value is required");
}

#[tokio::test]
async fn test_predict_success_is_deterministic() {
    let app = default_app();
    let (status, first) =
        send(app.clone(), post_json("/predict", json!({ "turbidity": 5.0 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, json!({ "predicted_life_hours": 900.0 }));

    let (_, second) = send(app, post_json("/predict", json!({ "turbidity": 5.0 }))).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_predict_rounds_to_two_decimals() {
    let (_, body) = send(
        default_app(),
        post_json("/predict", json!({ "turbidity": 1.23456 })),
    )
    .await;
    // 1000 - 20 * 1.23456 = 975.3088
    assert_eq!(body["predicted_life_hours"], 975.31);
}

#[tokio::test]
async fn test_predict_out_of_range_passes_through() {
    let (status, body) = send(
        default_app(),
        post_json("/predict", json!({ "turbidity": -10.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["predicted_life_hours"], 1200.0);
}

#[tokio::test]
async fn test_predict_invalid_inputs_are_client_errors() {
    let (status, body) = send(
        default_app(),
        post_json("/predict", json!({ "turbidity": "cloudy" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Invalid turbidity"));

    let request = Request::builder()
        .method("POST")
        .uri("/predict")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(default_app(), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_predict_model_failure_is_client_error() {
    let app = app_with(
        Arc::new(ReadingStore::new()),
        unreachable_gemini(),
        Some(failing_predictor()),
    );
    let (status, body) = send(app, post_json("/predict", json!({ "turbidity": 5.0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("estimator is not fitted"));
}

#[tokio::test]
async fn test_predict_without_model() {
    let app = app_with(Arc::new(ReadingStore::new()), unreachable_gemini(), None);
    let (status, body) = send(app, post_json("/predict", json!({ "turbidity": 5.0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Lifespan model is not loaded");
}

#[tokio::test]
async fn test_analyze_requires_ten_points() {
    let (status, body) =
        send(default_app(), post_json("/gemini", json!({ "data": [1, 2, 3] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Not enough data points" }));

    let (status, _) = send(default_app(), post_json("/gemini", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_analyze_invalid_entries_do_not_count() {
    let mut data: Vec<Value> = (1..=9).map(|i| json!(i)).collect();
    data.extend([json!("abc"), Value::Null, json!(true)]);

    let (status, body) = send(default_app(), post_json("/gemini", json!({ "data": data }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Not enough data points");
}

#[tokio::test]
async fn test_analyze_network_failure_falls_back() {
    let (status, body) = send(
        default_app(),
        post_json("/gemini", json!({ "data": ten_samples() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "analysis": FALLBACK_ANALYSIS }));
}

#[tokio::test]
async fn test_analyze_uses_only_valid_samples() {
    let (base_url, captured) = fake_gemini(
        StatusCode::OK,
        json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Water is getting clearer." }], "role": "model" },
                "finishReason": "STOP"
            }]
        }),
    )
    .await;
    let app = app_with(Arc::new(ReadingStore::new()), gemini_at(&base_url), None);

    let mut data = ten_samples();
    data.extend([json!("abc"), Value::Null]);
    let (status, body) = send(app, post_json("/gemini", json!({ "data": data }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "analysis": "Water is getting clearer." }));

    let requests = captured.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let (query, payload) = &requests[0];
    assert_eq!(query.as_deref(), Some("key=test-key"));

    let prompt = payload["contents"][0]["parts"][0]["text"]
        .as_str()
        .expect("Prompt should be text");
    assert!(prompt.contains("10 readings"));
    assert!(prompt.contains("[0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.5, 4.0, 4.5, 5.0]"));
    assert!(prompt.contains("Average turbidity: 2.75 NTU"));
    assert!(!prompt.contains("abc"));
}

#[tokio::test]
async fn test_analyze_enriched_prompt_carries_prediction() {
    let (base_url, captured) = fake_gemini(
        StatusCode::OK,
        json!({ "candidates": [{ "content": { "parts": [{ "text": "ok" }] } }] }),
    )
    .await;
    let app = app_with(
        Arc::new(ReadingStore::new()),
        gemini_at(&base_url),
        Some(linear_predictor()),
    );

    let (status, _) = send(app, post_json("/gemini", json!({ "data": ten_samples() }))).await;
    assert_eq!(status, StatusCode::OK);

    let requests = captured.lock().unwrap();
    let prompt = requests[0].1["contents"][0]["parts"][0]["text"]
        .as_str()
        .unwrap()
        .to_string();
    // mean 2.75 -> 1000 - 55
    assert!(prompt.contains("945.00 hours"));
}

#[tokio::test]
async fn test_analyze_upstream_error_status_falls_back() {
    let (base_url, _) = fake_gemini(
        StatusCode::TOO_MANY_REQUESTS,
        json!({ "error": { "code": 429, "message": "quota exceeded" } }),
    )
    .await;
    let app = app_with(Arc::new(ReadingStore::new()), gemini_at(&base_url), None);

    let (status, body) = send(app, post_json("/gemini", json!({ "data": ten_samples() }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["analysis"], FALLBACK_ANALYSIS);
}

#[tokio::test]
async fn test_analyze_empty_candidates_falls_back() {
    let (base_url, _) = fake_gemini(StatusCode::OK, json!({ "candidates": [] })).await;
    let app = app_with(Arc::new(ReadingStore::new()), gemini_at(&base_url), None);

    let (status, body) = send(app, post_json("/gemini", json!({ "data": ten_samples() }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["analysis"], FALLBACK_ANALYSIS);
}

#[tokio::test]
async fn test_analyze_internal_error_is_server_error() {
    let app = app_with(Arc::new(ReadingStore::new()), Arc::new(BrokenService), None);
    let (status, body) = send(app, post_json("/gemini", json!({ "data": ten_samples() }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Gemini analysis failed" }));
}

#[tokio::test]
async fn test_analyze_predictor_failure_is_server_error() {
    let app = app_with(
        Arc::new(ReadingStore::new()),
        unreachable_gemini(),
        Some(failing_predictor()),
    );
    let (status, body) = send(app, post_json("/gemini", json!({ "data": ten_samples() }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Gemini analysis failed");
}

#[tokio::test]
async fn test_analyze_unreadable_body_is_server_error() {
    let request = Request::builder()
        .method("POST")
        .uri("/gemini")
        .header("content-type", "application/json")
        .body(Body::from("[1, 2"))
        .unwrap();
    let (status, body) = send(default_app(), request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Gemini analysis failed");
}

#[tokio::test]
async fn test_health_check() {
    let store = Arc::new(ReadingStore::new());
    store.write(1.5);
    let (status, body) = send(
        app_with(store, unreachable_gemini(), Some(linear_predictor())),
        get("/health"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["model_loaded"], true);
    assert_eq!(body["reading"], 1.5);
}

#[tokio::test]
async fn test_cors_preflight_for_dashboard_origin() {
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/gemini")
        .header("origin", "http://localhost:5173")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap();
    let response = default_app().oneshot(request).await.unwrap();
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("http://localhost:5173")
    );
}

#[tokio::test]
async fn test_concurrent_reads_during_writes() {
    let store = Arc::new(ReadingStore::new());
    let app = app_with(store.clone(), unreachable_gemini(), None);

    let writer = {
        let store = store.clone();
        std::thread::spawn(move || {
            for i in 0..1000 {
                store.write(i as f64);
            }
        })
    };

    let requests = (0..20).map(|_| send(app.clone(), get("/data")));
    let results = futures_util::future::join_all(requests).await;
    writer.join().unwrap();

    for (status, body) in results {
        assert_eq!(status, StatusCode::OK);
        let value = body["value"].as_f64().unwrap();
        assert!((0.0..1000.0).contains(&value));
    }
}
