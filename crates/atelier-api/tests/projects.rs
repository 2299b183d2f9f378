mod common;

use axum::http::StatusCode;
use serde_json::{Value, json};
use uuid::Uuid;

use atelier_types::models::Role;

use common::{TestApp, TestUser};

async fn post_project(app: &TestApp, client: &TestUser) -> Uuid {
    let (status, body) = app
        .post(
            "/projects",
            client,
            json!({ "title": "Brand refresh", "description": "New logo and palette", "budget": 1200.0 }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {}", body);
    assert_eq!(body["status"], "open");
    body["id"].as_str().unwrap().parse().unwrap()
}

async fn select(app: &TestApp, caller: &TestUser, project: Uuid, designer: Uuid) -> (StatusCode, Value) {
    app.post(
        &format!("/projects/{}/select", project),
        caller,
        json!({ "designerId": designer }),
    )
    .await
}

#[tokio::test]
async fn only_clients_post_valid_projects() {
    let app = TestApp::new();
    let ana = app.add_user("Ana", Role::Client);
    let bo = app.add_user("Bo", Role::Designer);

    let project = post_project(&app, &ana).await;
    let (status, body) = app.get(&format!("/projects/{}", project), &bo).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["clientId"], ana.id.to_string());
    assert!(body["designerId"].is_null());

    let (status, _) = app
        .post("/projects", &bo, json!({ "title": "Mine", "description": "x", "budget": 1.0 }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .post("/projects", &ana, json!({ "title": "  ", "description": "x", "budget": 1.0 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("/projects", &ana, json!({ "title": "Cheap", "description": "x", "budget": -5.0 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    for description in ["".to_string(), "   ".to_string(), "d".repeat(2001)] {
        let (status, _) = app
            .post("/projects", &ana, json!({ "title": "Logo", "description": description, "budget": 1.0 }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    let (status, _) = app.get(&format!("/projects/{}", Uuid::new_v4()), &ana).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn selecting_a_designer_starts_the_project() {
    let app = TestApp::new();
    let ana = app.add_user("Ana", Role::Client);
    let bo = app.add_user("Bo", Role::Designer);
    let cy = app.add_user("Cy", Role::Designer);
    let dee = app.add_user("Dee", Role::Client);
    let project = post_project(&app, &ana).await;

    // Not the owner
    let (status, _) = select(&app, &dee, project, bo.id).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Not a designer
    let (status, _) = select(&app, &ana, project, dee.id).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = select(&app, &ana, project, Uuid::new_v4()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = select(&app, &ana, project, bo.id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "in_progress");
    assert_eq!(body["designerId"], bo.id.to_string());

    let (status, _) = select(&app, &ana, project, cy.id).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn project_context_resolves_to_the_pair_conversation() {
    let app = TestApp::new();
    let ana = app.add_user("Ana", Role::Client);
    let bo = app.add_user("Bo", Role::Designer);
    let eve = app.add_user("Eve", Role::Designer);
    let project = post_project(&app, &ana).await;

    // No designer selected yet
    let (status, _) = app.get(&format!("/conversations?projectId={}", project), &ana).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    select(&app, &ana, project, bo.id).await;

    let from_client = app.resolve(&ana, &format!("projectId={}", project)).await;
    let from_designer = app.resolve(&bo, &format!("projectId={}", project)).await;
    let direct = app.resolve(&bo, &format!("clientId={}", ana.id)).await;
    assert_eq!(from_client, from_designer);
    assert_eq!(from_client, direct);

    let (status, _) = app.get(&format!("/conversations?projectId={}", project), &eve).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .get(&format!("/conversations?projectId={}", Uuid::new_v4()), &ana)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, list) = app.get("/conversations/mine", &bo).await;
    assert_eq!(list[0]["projectId"], project.to_string());
}
