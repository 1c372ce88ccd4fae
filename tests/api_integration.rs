//! Integration tests for the REST API.
//!
//! Each test spins up the full router on a random port over an in-memory
//! libSQL store and drives it with reqwest.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode, multipart};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use eks::config::EksConfig;
use eks::server::{AppState, build_router};
use eks::store::{GraphStore, LibSqlBackend};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const ROSTER: &str = "\
name;company;jobTitle;department;access;relationshipType;accessTypes;location;email;status;role;managerEmail
Bruno Lima;Acme;Analista;Finanas;Dados;colaborador;leitura;São Paulo;bruno@acme.com;ativo;user;carla@acme.com
Carla Dias;Acme;Diretora;Finanas;Dados,Estratgico;colaborador;leitura,escrita;São Paulo;carla@acme.com;ativo;admin;
Davi Rocha;Acme;Analista;Finanas;Dados;colaborador;leitura;Rio;davi@acme.com;ativo;user;carla@acme.com
";

/// Start the API on a random port, return its base URL.
async fn start_server() -> String {
    let vars = HashMap::from([
        (
            "JWT_SECRET".to_string(),
            "integration-secret-0123456789abcdef".to_string(),
        ),
        ("BCRYPT_COST".to_string(), "4".to_string()),
        ("BOOTSTRAP_ADMIN_PASSWORD".to_string(), "admin123".to_string()),
    ]);
    let config = EksConfig::from_map(&vars).unwrap();
    let store: Arc<dyn GraphStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let app = build_router(AppState::new(store, &config), "*").unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://127.0.0.1:{port}")
}

async fn login(client: &Client, base: &str, email: &str, password: &str) -> (StatusCode, Value) {
    let response = client
        .post(format!("{base}/auth/login"))
        .json(&json!({"email": email, "password": password}))
        .send()
        .await
        .unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

/// Log in and return the access token.
async fn token(client: &Client, base: &str, email: &str, password: &str) -> String {
    let (status, body) = login(client, base, email, password).await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    body["data"]["accessToken"].as_str().unwrap().to_string()
}

async fn get(client: &Client, url: String, token: &str) -> (StatusCode, Value) {
    let response = client.get(url).bearer_auth(token).send().await.unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

async fn post(client: &Client, url: String, token: &str, body: Value) -> (StatusCode, Value) {
    let response = client
        .post(url)
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

async fn upload_roster(client: &Client, base: &str, token: &str, csv: &str) -> (StatusCode, Value) {
    let part = multipart::Part::bytes(csv.as_bytes().to_vec())
        .file_name("roster.csv")
        .mime_str("text/csv")
        .unwrap();
    let response = client
        .post(format!("{base}/admin/ingest/orgchart"))
        .bearer_auth(token)
        .multipart(multipart::Form::new().part("file", part))
        .send()
        .await
        .unwrap();
    let status = response.status();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn health_reports_backend() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let body: Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "eks");
        assert_eq!(body["backend"], "libsql");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn bootstrap_admin_logs_in_without_a_user() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = Client::new();

        let (status, body) = login(&client, &base, "admin@admin.com.br", "wrong").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);

        let admin = token(&client, &base, "Admin@Admin.com.br", "admin123").await;
        let (status, me) = get(&client, format!("{base}/auth/me"), &admin).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["data"]["userId"], "bootstrap-admin");
        assert_eq!(me["data"]["role"], "admin");

        let (status, _) = post(
            &client,
            format!("{base}/auth/change-password"),
            &admin,
            json!({"currentPassword": "admin123", "newPassword": "another"}),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn admin_creates_user_who_changes_password() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = Client::new();
        let admin = token(&client, &base, "admin@admin.com.br", "admin123").await;

        let new_user = json!({
            "name": "Ana Souza",
            "email": "ana@acme.com",
            "password": "first-pass",
            "company": "Acme",
            "department": "Produto",
            "jobTitle": "Gerente",
            "forcePasswordChange": true
        });
        let (status, created) =
            post(&client, format!("{base}/admin/users"), &admin, new_user.clone()).await;
        assert_eq!(status, StatusCode::OK, "{created}");
        assert_eq!(created["data"]["email"], "ana@acme.com");
        assert!(created["data"].get("passwordHash").is_none());

        let (status, _) = post(&client, format!("{base}/admin/users"), &admin, new_user).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let ana = token(&client, &base, "ana@acme.com", "first-pass").await;
        let (_, me) = get(&client, format!("{base}/auth/me"), &ana).await;
        assert_eq!(me["data"]["forcePasswordChange"], true);
        assert_eq!(me["data"]["company"], "Acme");

        let (status, _) = get(&client, format!("{base}/admin/users"), &ana).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = post(
            &client,
            format!("{base}/auth/change-password"),
            &ana,
            json!({"currentPassword": "nope", "newPassword": "second-pass"}),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = post(
            &client,
            format!("{base}/auth/change-password"),
            &ana,
            json!({"currentPassword": "first-pass", "newPassword": "second-pass"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = login(&client, &base, "ana@acme.com", "first-pass").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let ana = token(&client, &base, "ana@acme.com", "second-pass").await;
        let (_, me) = get(&client, format!("{base}/auth/me"), &ana).await;
        assert_eq!(me["data"]["forcePasswordChange"], false);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn requests_without_token_are_rejected() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let response = reqwest::get(format!("{base}/auth/me")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], false);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn roster_upload_builds_org_chart_for_validation() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = Client::new();
        let admin = token(&client, &base, "admin@admin.com.br", "admin123").await;

        let (_, status_before) = get(&client, format!("{base}/admin/ingest/status"), &admin).await;
        assert_eq!(status_before["data"]["isEmpty"], true);

        let (status, report) = upload_roster(&client, &base, &admin, ROSTER).await;
        assert_eq!(status, StatusCode::OK, "{report}");
        let summary = &report["data"]["summary"];
        assert_eq!(summary["totalRows"], 3);
        assert_eq!(summary["usersCreated"], 3);
        assert_eq!(summary["reportsToCreated"], 2);
        assert_eq!(summary["errors"], json!([]));
        assert_eq!(report["data"]["users"][0]["department"], "Finanças");

        let (_, status_after) = get(&client, format!("{base}/admin/ingest/status"), &admin).await;
        assert_eq!(status_after["data"]["isEmpty"], false);
        assert_eq!(status_after["data"]["counts"]["reportsTo"], 2);

        // Ingested users start with the default password and must change it.
        let bruno = token(&client, &base, "bruno@acme.com", "EKB123").await;
        let (_, me) = get(&client, format!("{base}/auth/me"), &bruno).await;
        assert_eq!(me["data"]["forcePasswordChange"], true);

        let (status, chart) = get(&client, format!("{base}/orgchart/me"), &bruno).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(chart["data"]["manager"]["email"], "carla@acme.com");
        assert_eq!(chart["data"]["peers"][0]["email"], "davi@acme.com");

        let (_, position) = get(&client, format!("{base}/orgchart/me/position"), &bruno).await;
        assert_eq!(position["data"]["showValidationCard"], true);

        let (status, validated) =
            post(&client, format!("{base}/orgchart/me/validate"), &bruno, json!({})).await;
        assert_eq!(status, StatusCode::OK, "{validated}");
        assert_eq!(validated["data"]["showValidationCard"], false);
        assert_eq!(validated["data"]["position"]["validatedByUser"], true);

        let (_, position) = get(&client, format!("{base}/orgchart/me/position"), &bruno).await;
        assert_eq!(position["data"]["showValidationCard"], false);

        let (status, _) = post(
            &client,
            format!("{base}/orgchart/me/report"),
            &bruno,
            json!({"description": "  "}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = post(
            &client,
            format!("{base}/orgchart/me/report"),
            &bruno,
            json!({"description": "Davi moved to another team"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, issues) = get(&client, format!("{base}/admin/orgchart/issues"), &admin).await;
        assert_eq!(issues["data"].as_array().unwrap().len(), 1);

        // Re-ingestion updates in place.
        let (_, report) = upload_roster(&client, &base, &admin, ROSTER).await;
        assert_eq!(report["data"]["summary"]["usersCreated"], 0);
        assert_eq!(report["data"]["summary"]["usersUpdated"], 3);
        let (_, status_again) = get(&client, format!("{base}/admin/ingest/status"), &admin).await;
        assert_eq!(status_again["data"]["counts"]["reportsTo"], 2);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn roster_upload_requires_file_field() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = Client::new();
        let admin = token(&client, &base, "admin@admin.com.br", "admin123").await;

        let response = client
            .post(format!("{base}/admin/ingest/orgchart"))
            .bearer_auth(&admin)
            .multipart(multipart::Form::new().text("other", "x"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "Invalid request: No file uploaded");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn onboarding_completes_into_persona_versions() {
    timeout(TEST_TIMEOUT, async {
        let base = start_server().await;
        let client = Client::new();
        let admin = token(&client, &base, "admin@admin.com.br", "admin123").await;
        upload_roster(&client, &base, &admin, ROSTER).await;
        let carla = token(&client, &base, "carla@acme.com", "EKB123").await;

        let (_, prefill) = get(&client, format!("{base}/onboarding/prefill"), &carla).await;
        assert_eq!(prefill["data"]["prefill"]["name"], "Carla Dias");

        let (status, _) = post(&client, format!("{base}/onboarding/complete"), &carla, json!({})).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, session) =
            post(&client, format!("{base}/onboarding/session/start"), &carla, json!({})).await;
        assert_eq!(status, StatusCode::OK, "{session}");
        assert_eq!(session["data"]["currentStep"], "profile");

        for (field, value) in [
            ("fullName", json!("Carla Dias")),
            ("jobRole", json!("Diretora")),
            ("competencies", json!(["Finanças", "Liderança"])),
            ("primaryObjective", json!("Automatizar relatórios")),
        ] {
            let (status, _) = post(
                &client,
                format!("{base}/onboarding/session/response"),
                &carla,
                json!({"field": field, "value": value}),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, _) = post(
            &client,
            format!("{base}/onboarding/session/goto"),
            &carla,
            json!({"step": "nowhere"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = post(
            &client,
            format!("{base}/onboarding/session/conversation/start"),
            &carla,
            json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, done) =
            post(&client, format!("{base}/onboarding/complete"), &carla, json!({})).await;
        assert_eq!(status, StatusCode::OK, "{done}");
        assert_eq!(done["data"]["personaVersion"], "v1");
        assert_eq!(done["data"]["created"], true);
        assert_eq!(done["data"]["session"]["status"], "completed");

        let (_, status_view) = get(&client, format!("{base}/onboarding/status"), &carla).await;
        assert_eq!(status_view["data"]["hasFirstRunOnboarding"], true);
        assert_eq!(status_view["data"]["status"], "completed");
    })
    .await
    .expect("test timed out");
}
