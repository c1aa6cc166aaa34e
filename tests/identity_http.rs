//! Credential validation against a mock identity service.

use std::time::Duration;

use pf9ctl::auth::IdentityValidator;
use pf9ctl::config::{ConfigError, CredentialValidator, OperatorConfig};
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN_PATH: &str = "/keystone/v3/auth/tokens";

fn token_body() -> Value {
    json!({
        "token": {
            "expires_at": "2099-01-01T00:00:00.000000Z",
            "user": { "id": "user-1", "name": "ops@acme.io" },
            "project": { "id": "proj-1", "name": "service" }
        }
    })
}

fn config_for(server: &MockServer, region: &str) -> OperatorConfig {
    OperatorConfig {
        account_url: server.uri(),
        username: String::from("ops@acme.io"),
        password: String::from("hunter2"),
        region: region.to_owned(),
        ..OperatorConfig::default()
    }
}

async fn mount_catalog(server: &MockServer, endpoint: &str) {
    Mock::given(method("GET"))
        .and(path("/keystone/v3/services"))
        .and(query_param("type", "regionInfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "services": [{ "id": "svc-1" }]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/keystone/v3/endpoints"))
        .and(query_param("service_id", "svc-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "endpoints": [
                { "region": "RegionOne", "interface": "public", "url": "https://public.acme.io/region" },
                { "region": "RegionOne", "interface": "internal", "url": endpoint },
            ]
        })))
        .mount(server)
        .await;
}

async fn mount_token(server: &MockServer, scope: Value, status: u16) {
    let template = if status == 201 {
        ResponseTemplate::new(201)
            .insert_header("X-Subject-Token", "tok-abc")
            .set_body_json(token_body())
    } else {
        ResponseTemplate::new(status).set_body_string("The request you have made requires authentication.")
    };
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_partial_json(json!({ "auth": { "scope": { "project": scope } } })))
        .respond_with(template)
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn tenant_falls_back_from_name_to_id_scope() {
    let server = MockServer::start().await;
    mount_token(&server, json!({ "name": "service" }), 401).await;
    mount_token(&server, json!({ "id": "service" }), 201).await;
    let region_url = format!("{}/region/v1", server.uri());
    mount_catalog(&server, &region_url).await;

    let validator = IdentityValidator::new(Duration::from_secs(5));
    let config = config_for(&server, "RegionOne");
    let session = validator
        .validate(&config)
        .await
        .unwrap_or_else(|err| panic!("id scope should validate: {err}"));

    assert_eq!(session.token.token, "tok-abc");
    assert_eq!(session.token.project_id, "proj-1");
    assert_eq!(session.endpoint.as_str(), format!("{}/", server.uri()));
}

#[tokio::test]
async fn rejected_credentials_report_the_name_scope_failure() {
    let server = MockServer::start().await;
    mount_token(&server, json!({ "name": "service" }), 401).await;
    mount_token(&server, json!({ "id": "service" }), 404).await;

    let validator = IdentityValidator::new(Duration::from_secs(5));
    let err = validator
        .validate(&config_for(&server, "RegionOne"))
        .await
        .err();

    assert!(
        matches!(&err, Some(ConfigError::InvalidCreds { message }) if message.contains("401")),
        "got {err:?}"
    );
}

#[tokio::test]
async fn unknown_region_is_reported_as_such() {
    let server = MockServer::start().await;
    mount_token(&server, json!({ "name": "service" }), 201).await;
    mount_catalog(&server, "https://internal.acme.io/region").await;

    let validator = IdentityValidator::new(Duration::from_secs(5));
    let err = validator
        .validate(&config_for(&server, "RegionTwo"))
        .await
        .err();

    assert!(
        matches!(&err, Some(ConfigError::InvalidRegion { region }) if region == "RegionTwo"),
        "got {err:?}"
    );
}
