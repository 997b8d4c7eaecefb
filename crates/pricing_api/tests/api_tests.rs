use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use pricing_api::{build_router, ApiConfig, AppState};
use pricing_service::{PricingService, ServiceConfig};
use pricing_trainer::{Dataset, ForestParams, LcgRng, ProductRecord};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "pricing-test-boundary";

fn records(n: usize, first_id: i64) -> Vec<ProductRecord> {
    let mut rng = LcgRng::new(first_id as u64 + 7);
    (0..n)
        .map(|i| {
            let id = first_id + i as i64;
            let base_price = 15.0 + rng.next_below(150) as f64;
            let competitor_avg_price = base_price * (0.9 + rng.next_below(20) as f64 / 100.0);
            ProductRecord {
                product_id: Some(id),
                product_name: Some(format!("Product {id}")),
                category: ["Books", "Electronics"][rng.next_below(2)].to_string(),
                base_price,
                inventory_level: rng.next_below(300) as i64,
                competitor_avg_price,
                sales_last_30_days: rng.next_below(200) as i64,
                rating: 3.5 + rng.next_below(15) as f64 / 10.0,
                review_count: rng.next_below(500) as i64,
                season: "All".to_string(),
                brand_tier: ["Budget", "Premium"][rng.next_below(2)].to_string(),
                material_cost: base_price * 0.3,
                target_price: (competitor_avg_price * 100.0).round() / 100.0,
            }
        })
        .collect()
}

struct TestApp {
    _dir: TempDir,
    router: Router,
}

fn app(rows: usize, bootstrap: bool, api: ApiConfig) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ServiceConfig::default();
    config.data.dataset_path = dir.path().join("dataset.csv");
    config.data.model_dir = dir.path().join("models");
    config.forest = ForestParams {
        n_trees: 6,
        ..ForestParams::default()
    };
    if rows > 0 {
        Dataset::new(records(rows, 1))
            .write_csv(&config.data.dataset_path)
            .unwrap();
    }

    let service = Arc::new(PricingService::new(config).unwrap());
    if bootstrap {
        service.bootstrap().unwrap();
    }
    let state = AppState::new(service, &api);
    let router = build_router(Arc::new(state), &api).unwrap();
    TestApp { _dir: dir, router }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn predict_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn upload_request(file_name: &str, csv: &str, token: Option<&str>) -> Request<Body> {
    let body = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
         Content-Type: text/csv\r\n\r\n\
         {csv}\r\n\
         --{BOUNDARY}--\r\n"
    );
    let mut builder = Request::builder()
        .method("POST")
        .uri("/upload-data")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).unwrap()
}

fn sample_product() -> Value {
    json!({
        "product_name": "Wireless Headphones",
        "category": "Electronics",
        "base_price": 100.0,
        "inventory_level": 50,
        "competitor_avg_price": 95.0,
        "sales_last_30_days": 150,
        "rating": 4.2,
        "review_count": 320,
        "season": "All",
        "brand_tier": "Premium",
        "material_cost": 30.0
    })
}

fn upload_csv(rows: Vec<ProductRecord>) -> String {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("batch.csv");
    Dataset::new(rows).write_csv(&path).unwrap();
    std::fs::read_to_string(path).unwrap()
}

#[tokio::test]
async fn health_reports_model_state() {
    let cold = app(0, true, ApiConfig::default());
    let (status, body) = send(&cold.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model_loaded"], false);

    let warm = app(60, true, ApiConfig::default());
    let (_, body) = send(&warm.router, get("/health")).await;
    assert_eq!(body["model_loaded"], true);
    assert_eq!(body["model"]["num_trees"], 6);
}

#[tokio::test]
async fn predict_without_model_is_unavailable() {
    let test = app(0, true, ApiConfig::default());
    let (status, body) = send(&test.router, predict_request(sample_product())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());

    let (status, _) = send(&test.router, get("/metrics")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn predict_returns_recommendation() {
    let test = app(80, true, ApiConfig::default());
    let (status, body) = send(&test.router, predict_request(sample_product())).await;
    assert_eq!(status, StatusCode::OK);

    let price = body["predicted_price"].as_f64().unwrap();
    let change = body["price_change_percentage"].as_f64().unwrap();
    let confidence = body["confidence_score"].as_f64().unwrap();
    assert!(price > 0.0);
    assert!((0.6..=0.95).contains(&confidence));
    let expected = match change {
        c if c > 5.0 => "increase",
        c if c < -5.0 => "decrease",
        _ => "maintain",
    };
    assert_eq!(body["recommendation"], expected);
    assert!(body.get("unseen_categories").is_none());
}

#[tokio::test]
async fn predict_rejects_bad_payloads() {
    let test = app(40, true, ApiConfig::default());

    let mut missing = sample_product();
    missing.as_object_mut().unwrap().remove("rating");
    let (status, _) = send(&test.router, predict_request(missing)).await;
    assert!(status.is_client_error());

    let mut free = sample_product();
    free["base_price"] = json!(0.0);
    let (status, body) = send(&test.router, predict_request(free)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("base_price"));
}

#[tokio::test]
async fn metrics_follow_training() {
    let test = app(60, true, ApiConfig::default());
    let (status, body) = send(&test.router, get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model_type"], "Random Forest Regressor");
    assert_eq!(body["training_samples"], 48);
    assert!(body["feature_importance"].as_object().unwrap().len() == 10);
}

#[tokio::test]
async fn admin_routes_require_token_when_configured() {
    let api = ApiConfig {
        admin_token: Some("s3cret".to_string()),
        ..ApiConfig::default()
    };
    let test = app(40, true, api);
    let csv = upload_csv(records(5, 100));

    let (status, _) = send(&test.router, upload_request("batch.csv", &csv, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    for wrong in ["nope", "s3cre", "s3cret-and-more", "S3CRET"] {
        let (status, _) = send(&test.router, upload_request("batch.csv", &csv, Some(wrong))).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "token {wrong:?}");
    }

    let train = Request::builder()
        .method("POST")
        .uri("/train")
        .header(header::AUTHORIZATION, "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&test.router, train).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["metrics"]["r2_score"].is_number());
}

#[tokio::test]
async fn upload_merges_and_reports_stats() {
    let test = app(40, true, ApiConfig::default());
    // Ids 36..=45 overlap five existing rows
    let csv = upload_csv(records(10, 36));

    let (status, body) = send(&test.router, upload_request("batch.csv", &csv, None)).await;
    assert_eq!(status, StatusCode::OK);
    let stats = &body["stats"];
    assert_eq!(stats["new_records"], 10);
    assert_eq!(stats["existing_records"], 40);
    assert_eq!(stats["duplicates_removed"], 5);
    assert_eq!(stats["total_records"], 45);
    assert_eq!(stats["retraining_status"], "completed");

    let (_, page) = send(&test.router, get("/products?limit=1")).await;
    assert_eq!(page["total"], 45);
}

#[tokio::test]
async fn upload_rejections() {
    let test = app(20, true, ApiConfig::default());

    let (status, _) = send(&test.router, upload_request("batch.txt", "a,b\n1,2\n", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let csv = "product_id,product_name,category,base_price,inventory_level,competitor_avg_price,sales_last_30_days,review_count,season,brand_tier,material_cost,target_price\n\
               1,A,Books,10,1,11,2,3,All,Budget,2,10.5\n";
    let (status, body) = send(&test.router, upload_request("batch.csv", csv, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["missing_columns"], json!(["rating"]));

    let mut bad = records(2, 500);
    bad[1].rating = 7.5;
    let (status, body) =
        send(&test.router, upload_request("batch.csv", &upload_csv(bad), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let errors = body["validation_errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].as_str().unwrap().starts_with("line 3"));

    let wrong_field = Request::builder()
        .method("POST")
        .uri("/upload-data")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"data\"\r\n\r\n\
             hello\r\n\
             --{BOUNDARY}--\r\n"
        )))
        .unwrap();
    let (status, body) = send(&test.router, wrong_field).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("file"));
}

#[tokio::test]
async fn products_are_filtered_and_looked_up() {
    let test = app(30, true, ApiConfig::default());

    let (status, page) = send(
        &test.router,
        get("/products?category=Books&sort_by=price_low&limit=50"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let products = page["products"].as_array().unwrap();
    assert!(!products.is_empty());
    assert!(products.iter().all(|p| p["category"] == "Books"));
    let prices: Vec<f64> = products
        .iter()
        .map(|p| p["base_price"].as_f64().unwrap())
        .collect();
    assert!(prices.windows(2).all(|w| w[0] <= w[1]));

    let (status, product) = send(&test.router, get("/products/3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(product["product_name"], "Product 3");
    assert!(product["predicted_price"].is_number());

    let (status, _) = send(&test.router, get("/products/4242")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&test.router, get("/products?limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn prometheus_route_needs_exporter() {
    let test = app(0, false, ApiConfig::default());
    let (status, _) = send(&test.router, get("/prometheus")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&test.router, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Dynamic Pricing API");
}

#[tokio::test]
async fn train_without_dataset_is_a_client_error() {
    let test = app(0, true, ApiConfig::default());
    let train = Request::builder()
        .method("POST")
        .uri("/train")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&test.router, train).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("does not exist"));
}
