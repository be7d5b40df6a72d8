use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use claims_projection_service::handlers::{self, AppState};
use claims_projection_service::metrics::ProjectionMetrics;
use claims_projection_service::services::cdc::{
    ChangeEnvelope, ConsumerErrorState, Materializer, SessionHealth,
};
use claims_projection_service::{ProjectionStore, QueryService};
use prometheus::Registry;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;

fn seeded_store() -> Arc<ProjectionStore> {
    let store = Arc::new(ProjectionStore::new());
    let materializer = Materializer::new(Arc::clone(&store));
    for (offset, (id, status)) in [("1", "OPEN"), ("2", "CLOSED")].into_iter().enumerate() {
        let value = json!({"payload": {"after": {
            "quoteid": id,
            "name": "Jane Doe",
            "claimstatus": status
        }}});
        materializer
            .apply(&ChangeEnvelope {
                key: Some(id.as_bytes().to_vec()),
                value: Some(serde_json::to_vec(&value).unwrap()),
                partition: 0,
                offset: offset as i64,
            })
            .unwrap();
    }
    store
}

fn state(query: QueryService) -> AppState {
    let registry = Registry::new();
    let metrics = ProjectionMetrics::new(&registry);
    metrics.store_rows.set(query.len() as i64);
    AppState {
        health: SessionHealth::new(Arc::new(ConsumerErrorState::new()), query.clone()),
        query,
        registry,
        port: 8080,
    }
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state))
                .configure(handlers::configure),
        )
        .await
    };
}

#[actix_rt::test]
async fn test_get_quote_by_id() {
    let app = app!(state(QueryService::detached(seeded_store())));

    for uri in ["/quoteid=1", "/quotes/1"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["quoteid"], "1");
        assert_eq!(body["claimstatus"], "OPEN");
    }
}

#[actix_rt::test]
async fn test_unknown_quote_is_not_found() {
    let app = app!(state(QueryService::detached(seeded_store())));

    let req = test::TestRequest::get().uri("/quoteid=404").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], 404);
}

#[actix_rt::test]
async fn test_get_all_data() {
    let app = app!(state(QueryService::detached(seeded_store())));

    for uri in ["/getalldata", "/quotes"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let body: Vec<Value> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.len(), 2);

        let mut ids: Vec<&str> = body.iter().filter_map(|r| r["quoteid"].as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["1", "2"]);
    }
}

#[actix_rt::test]
async fn test_empty_projection_returns_empty_array() {
    let app = app!(state(QueryService::detached(Arc::new(ProjectionStore::new()))));

    let req = test::TestRequest::get().uri("/getalldata").to_request();
    let body: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert!(body.is_empty());
}

#[actix_rt::test]
async fn test_queries_unavailable_until_ready() {
    let (ready_tx, ready_rx) = watch::channel(false);
    let app = app!(state(QueryService::new(seeded_store(), ready_rx)));

    for uri in ["/quoteid=1", "/getalldata", "/ready"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE, "{}", uri);
    }

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["ready"], false);

    ready_tx.send_replace(true);

    let req = test::TestRequest::get().uri("/ready").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::get().uri("/quoteid=2").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["claimstatus"], "CLOSED");

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["ready"], true);
    assert_eq!(body["rows"], 2);
}

#[actix_rt::test]
async fn test_banner_and_metrics() {
    let app = app!(state(QueryService::detached(seeded_store())));

    let req = test::TestRequest::get().uri("/").to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert!(String::from_utf8_lossy(&body).contains("8080"));

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert!(String::from_utf8_lossy(&body).contains("projection_store_rows 2"));
}
