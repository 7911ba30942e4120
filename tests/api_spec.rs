use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use epic_triage::api::{create_router, ApiAuth, AppState};
use epic_triage::db::Database;
use epic_triage::engine::EpicMergeEngine;
use epic_triage::models::*;
use epic_triage::store::{ObjectEvent, SqliteObjectStore, StoreOptions};
use epic_triage::synthesis::TemplateSynthesizer;
use serde_json::Value;

async fn seeded_store() -> SqliteObjectStore {
    let db = Database::open_memory().expect("Failed to create database");
    db.migrate().expect("Failed to migrate");
    let store = SqliteObjectStore::new(db);

    let engine = EpicMergeEngine::new(
        Arc::new(store.clone()),
        Arc::new(TemplateSynthesizer),
        StoreOptions::default(),
    );
    engine
        .merge(&Requirement::new("<m1>", "Project Phoenix", "Fitness", "tracks fitness goals"))
        .await;
    engine
        .merge(
            &Requirement::new("<m2>", "Project Phoenix", "Sharing", "share workouts")
                .with_attached_rules("Use hexagonal architecture"),
        )
        .await;
    store
}

async fn setup_with(auth: ApiAuth) -> TestServer {
    let state = AppState::new(seeded_store().await, StoreOptions::default());
    TestServer::new(create_router(state, auth)).expect("Failed to create test server")
}

async fn setup() -> TestServer {
    setup_with(ApiAuth::disabled()).await
}

mod health {
    use super::*;

    #[tokio::test]
    async fn reports_ok() {
        let server = setup().await;
        let response = server.get("/api/v1/health").await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["status"], "ok");
    }
}

mod projects {
    use super::*;

    #[tokio::test]
    async fn lists_project_buckets() {
        let server = setup().await;
        let response = server.get("/api/v1/projects").await;

        response.assert_status_ok();
        let projects: Vec<Value> = response.json();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0]["slug"], "project-phoenix");
        assert_eq!(projects[0]["bucket"], "jarvis-project-phoenix");
    }

    #[tokio::test]
    async fn returns_current_epic() {
        let server = setup().await;
        let response = server.get("/api/v1/projects/project-phoenix/epic").await;

        response.assert_status_ok();
        let epic: EpicDocument = response.json();
        assert!(epic.content.contains("tracks fitness goals"));
        assert!(epic.content.contains("share workouts"));
        assert_eq!(epic.source_message_id.as_deref(), Some("<m2>"));
    }

    #[tokio::test]
    async fn accepts_a_title_in_place_of_the_slug() {
        let server = setup().await;
        server
            .get("/api/v1/projects/Project%20Phoenix/epic")
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let server = setup().await;
        server
            .get("/api/v1/projects/image-displayer/epic")
            .await
            .assert_status_not_found();
    }

    #[tokio::test]
    async fn invalid_slug_is_bad_request() {
        let server = setup().await;
        server
            .get("/api/v1/projects/%21%21%21/epic")
            .await
            .assert_status_bad_request();
    }

    #[tokio::test]
    async fn returns_stored_rules() {
        let server = setup().await;
        let rules: RuleSet = server.get("/api/v1/projects/project-phoenix/rules").await.json();
        assert_eq!(rules.source, RuleSource::Stored);
        assert_eq!(rules.text, "Use hexagonal architecture");
    }

    #[tokio::test]
    async fn falls_back_to_base_rules() {
        let server = setup().await;
        let rules: RuleSet = server.get("/api/v1/projects/image-displayer/rules").await.json();
        assert_eq!(rules, RuleSet::base());
    }

    #[tokio::test]
    async fn returns_ledger_entries() {
        let server = setup().await;
        let entries: Vec<LedgerEntry> = server
            .get("/api/v1/projects/project-phoenix/ledger")
            .await
            .json();

        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(LedgerEntry::is_incorporated));
    }
}

mod events {
    use super::*;

    #[tokio::test]
    async fn lists_epic_writes_after_a_sequence_number() {
        let server = setup().await;

        let events: Vec<ObjectEvent> = server.get("/api/v1/events").await.json();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.key == "epics/epic.md"));
        assert!(events[0].seq < events[1].seq);

        let later: Vec<ObjectEvent> = server
            .get(&format!("/api/v1/events?after={}", events[0].seq))
            .await
            .json();
        assert_eq!(later, vec![events[1].clone()]);
    }
}

mod auth {
    use super::*;

    #[tokio::test]
    async fn rejects_missing_token() {
        let server = setup_with(ApiAuth::with_api_key("secret")).await;
        server
            .get("/api/v1/projects")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn rejects_wrong_token() {
        let server = setup_with(ApiAuth::with_api_key("secret")).await;
        server
            .get("/api/v1/projects")
            .authorization_bearer("guess")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn accepts_valid_token() {
        let server = setup_with(ApiAuth::with_api_key("secret")).await;
        server
            .get("/api/v1/projects")
            .authorization_bearer("secret")
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn health_stays_open() {
        let server = setup_with(ApiAuth::with_api_key("secret")).await;
        server.get("/api/v1/health").await.assert_status_ok();
    }
}
