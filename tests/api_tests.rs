//! Integration tests for the HTTP API.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot` method
use wardrobe_ledger::metadata::{Metadata, MetadataSource};
use wardrobe_ledger::{build_router, AppState, Gateway, Store};

struct StubMetadata;

#[async_trait]
impl MetadataSource for StubMetadata {
    async fn fetch(&self, url: &str) -> Metadata {
        if url.contains("broken") {
            return Metadata::failed("connection refused");
        }
        Metadata {
            title: "Linen Shirt".to_string(),
            image: "https://img.example.com/a.jpg".to_string(),
            price: "129".to_string(),
            success: true,
            warning: None,
            error: None,
        }
    }
}

fn fixed_today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
}

fn setup(files: &[(&str, &str)]) -> (TempDir, axum::Router) {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("data")).unwrap();
    for (name, content) in files {
        std::fs::write(dir.path().join("data").join(name), content).unwrap();
    }
    let store = Store::new(Gateway::new(dir.path(), "data").unwrap()).with_clock(fixed_today);
    let app = build_router(AppState::new(store, Arc::new(StubMetadata)));
    (dir, app)
}

fn read(dir: &Path, name: &str) -> String {
    std::fs::read_to_string(dir.join("data").join(name)).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

fn send_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_dir, app) = setup(&[]);

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "wardrobe-ledger");
}

#[tokio::test]
async fn test_collection_view_reports_full_set_indices() {
    let (_dir, app) = setup(&[(
        "inventory.csv",
        "衣服名稱,目前狀態\nBlue Tee,正在使用\nOld Tee,已售出\nRed Tee,正在使用\n",
    )]);

    let response = app
        .oneshot(get("/api/collections/inventory?q=red"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["columns"], json!(["名称", "状态"]));
    assert_eq!(json["revision"], 0);
    assert_eq!(json["total"], 3);
    assert_eq!(json["rows"].as_array().unwrap().len(), 1);
    assert_eq!(json["rows"][0]["index"], 2);
    assert_eq!(json["rows"][0]["record"]["名称"], "Red Tee");
}

#[tokio::test]
async fn test_unknown_collection_is_404() {
    let (_dir, app) = setup(&[]);

    let response = app.oneshot(get("/api/collections/closet")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_storage_move_prompts_for_location_then_succeeds() {
    let (dir, app) = setup(&[
        ("inventory.csv", "名称,状态\nCoat,正在使用\nScarf,正在使用\n"),
        ("storage.csv", "名称,状态,存放地点\nBoots,已收纳,Attic\n"),
    ]);

    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/collections/inventory/transition",
            json!({ "target": "storage", "indices": [0, 1], "batch": true }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["field"], "存放地点");
    assert_eq!(json["storage_locations"], json!(["Attic"]));
    assert_eq!(read(dir.path(), "inventory.csv"), "名称,状态\nCoat,正在使用\nScarf,正在使用\n");

    let response = app
        .oneshot(send_json(
            "POST",
            "/api/collections/inventory/transition",
            json!({
                "target": "storage",
                "indices": [0, 1],
                "batch": true,
                "storage_location": " Closet-B ",
                "expected_revision": 0
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["affected"], 2);
    assert_eq!(json["target_revision"], 1);
    assert_eq!(read(dir.path(), "inventory.csv"), "名称,状态\n");
    assert_eq!(
        read(dir.path(), "storage.csv"),
        "名称,状态,存放地点,换季日期\n\
         Coat,已收纳,Closet-B,2026年10月18日\n\
         Scarf,已收纳,Closet-B,2026年10月18日\n\
         Boots,已收纳,Attic,\n"
    );
}

#[tokio::test]
async fn test_stale_revision_is_409() {
    let (_dir, app) = setup(&[("discard.csv", "名称,状态\nA,待处理\n")]);

    let response = app
        .oneshot(send_json(
            "POST",
            "/api/collections/discard/transition",
            json!({ "target": "delete", "indices": [0], "expected_revision": 7 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["revision"], 0);
}

#[tokio::test]
async fn test_disallowed_transition_is_400() {
    let (dir, app) = setup(&[("purchases.csv", "名称,状态\nHat,已下单\n")]);

    let response = app
        .oneshot(send_json(
            "POST",
            "/api/collections/purchases/transition",
            json!({ "target": "storage", "indices": [0], "storage_location": "Box" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read(dir.path(), "purchases.csv"), "名称,状态\nHat,已下单\n");
}

#[tokio::test]
async fn test_create_and_update_records() {
    let (dir, app) = setup(&[]);

    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/collections/purchases/records",
            json!({ "fields": { "名称": "Hat", "价格": "59" } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["revision"], 1);

    let response = app
        .oneshot(send_json(
            "PUT",
            "/api/collections/purchases/records/0",
            json!({ "fields": { "备注": "gift" }, "expected_revision": 1 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(
        read(dir.path(), "purchases.csv"),
        "状态,购买日期,名称,价格,备注\n已下单,2026-10-18,Hat,59,gift\n"
    );
}

#[tokio::test]
async fn test_field_options_and_summary() {
    let (_dir, app) = setup(&[
        ("purchases.csv", "名称,品牌,价格,购买日期\nA,Muji,100,2026-02-01\nB,Zara,\"1,000\",2025-05-05\n"),
        ("inventory.csv", "名称,品牌,状态\nC,Muji,正在使用\n"),
    ]);

    // 品牌
    let response = app
        .clone()
        .oneshot(get("/api/field-options/%E5%93%81%E7%89%8C"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["values"], json!(["Muji", "Zara"]));

    let response = app.oneshot(get("/api/summary?year=2026")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["purchases"], 2);
    assert_eq!(json["inventory"], 1);
    assert_eq!(json["total_cost"], 1100.0);
    assert_eq!(json["year_cost"], 100.0);
    assert_eq!(json["previous_year_cost"], 1000.0);
    assert_eq!(json["years"], json!([2026, 2025]));
    // This year: twelve months ending October 2026.
    assert_eq!(json["monthly_labels"][0], "25/11");
    assert_eq!(json["monthly"][3], 100.0);
    assert_eq!(json["top_brands"][0]["name"], "Zara");
}

#[tokio::test]
async fn test_save_rejects_traversal() {
    let (dir, app) = setup(&[]);

    let response = app
        .oneshot(send_json(
            "POST",
            "/api/save",
            json!({ "filename": "../escaped.csv", "content": "x" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(!dir.path().parent().unwrap().join("escaped.csv").exists());
}

#[tokio::test]
async fn test_save_then_append_row() {
    let (dir, app) = setup(&[]);

    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/save",
            json!({ "filename": "data/discard.csv", "content": "名称,状态\nA,待处理\n" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/save/discard.csv",
            json!({ "状态": "已淘汰", "名称": "B, old", "尺码": "M" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        read(dir.path(), "discard.csv"),
        "名称,状态\nA,待处理\n\"B, old\",已淘汰\n"
    );

    let response = app.oneshot(get("/api/collections/discard")).await.unwrap();
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["rows"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_fetch_metadata() {
    let (_dir, app) = setup(&[]);

    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/fetch-metadata",
            json!({ "targetUrl": "https://shop.example.com/item/1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["title"], "Linen Shirt");

    let response = app
        .clone()
        .oneshot(send_json("POST", "/api/fetch-metadata", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(send_json(
            "POST",
            "/api/fetch-metadata",
            json!({ "targetUrl": "https://broken.example.com" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_malformed_requests_answer_with_json_errors() {
    let (_dir, app) = setup(&[("purchases.csv", "名称\nHat\n")]);

    let broken_body = Request::builder()
        .method("POST")
        .uri("/api/collections/purchases/records")
        .header("content-type", "application/json")
        .body(Body::from("{ not json"))
        .unwrap();
    let response = app.clone().oneshot(broken_body).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["success"], false);
    assert!(json["error"].is_string());

    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/save/purchases.csv",
            json!({ "名称": "Coat", "价格": 129 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["success"], false);

    let response = app
        .oneshot(send_json(
            "PUT",
            "/api/collections/purchases/records/first",
            json!({ "fields": { "备注": "x" } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = extract_json(response.into_body()).await;
    assert_eq!(json["success"], false);
}
