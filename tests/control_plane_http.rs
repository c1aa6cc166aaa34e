//! HTTP-level tests for the control-plane client against a mock server.

use std::time::Duration;

use pf9ctl::control_plane::{
    ClusterCreateRequest, ControlPlaneApi, ControlPlaneClient, ControlPlaneError, NodeRole,
    RetryPolicy,
};
use pf9ctl::platform::OsFamily;
use reqwest::Client;
use rstest::{fixture, rstest};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "tok-123";
const PROJECT: &str = "proj-1";
const ROLE_PATH: &str = "/resmgr/v1/hosts/abc-123/roles/pf9-kube";

#[fixture]
fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 5,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    }
}

fn client_for(server: &MockServer, retry: RetryPolicy) -> ControlPlaneClient {
    let base = Url::parse(&server.uri()).unwrap_or_else(|err| panic!("mock uri: {err}"));
    ControlPlaneClient::new(Client::new(), base, retry)
}

async fn requests_to(server: &MockServer, wanted: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == wanted)
        .count()
}

#[rstest]
#[tokio::test]
async fn authorize_retries_while_the_host_is_unknown(fast_retry: RetryPolicy) {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(ROLE_PATH))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(4)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(ROLE_PATH))
        .and(header("X-Auth-Token", TOKEN))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry);
    client
        .authorize_host("abc-123", TOKEN)
        .await
        .unwrap_or_else(|err| panic!("fifth attempt should succeed: {err}"));

    assert_eq!(requests_to(&server, ROLE_PATH).await, 5);
}

#[rstest]
#[tokio::test]
async fn authorize_surfaces_the_last_not_found(fast_retry: RetryPolicy) {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(ROLE_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_string("host not found"))
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry);
    let err = client.authorize_host("abc-123", TOKEN).await.err();

    assert!(
        matches!(&err, Some(ControlPlaneError::Status { status: 404, body, .. }) if body == "host not found"),
        "got {err:?}"
    );
    assert_eq!(requests_to(&server, ROLE_PATH).await, 5);
}

#[rstest]
#[tokio::test]
async fn authorize_does_not_retry_server_errors(fast_retry: RetryPolicy) {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path(ROLE_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry);
    let err = client.authorize_host("abc-123", TOKEN).await.err();

    assert_eq!(err.and_then(|failure| failure.status()), Some(500));
    assert_eq!(requests_to(&server, ROLE_PATH).await, 1);
}

#[rstest]
#[tokio::test]
async fn host_ids_match_primary_and_reported_addresses(fast_retry: RetryPolicy) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resmgr/v1/hosts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "host-a", "extensions": { "ip_address": { "data": ["10.0.0.5", "172.17.0.1"] } } },
            { "id": "host-b", "extensions": {} },
        ])))
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry);
    let ips = vec![String::from("10.0.0.6"), String::from("10.0.0.5")];
    let matches = client
        .get_host_ids(TOKEN, &ips)
        .await
        .unwrap_or_else(|err| panic!("host list should decode: {err}"));

    assert_eq!(matches.len(), 1);
    assert!(matches.iter().all(|found| found.ip == "10.0.0.5" && found.host_id == "host-a"));
}

#[rstest]
#[tokio::test]
async fn create_cluster_resolves_the_local_node_pool(fast_retry: RetryPolicy) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/qbert/v3/proj-1/clusters"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "uuid": "c-0", "name": "other", "status": "ok" },
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/qbert/v3/proj-1/cloudProviders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "type": "aws", "nodePoolUuid": "pool-aws" },
            { "type": "local", "nodePoolUuid": "pool-local" },
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/qbert/v3/proj-1/clusters"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "uuid": "c-1" })))
        .expect(1)
        .mount(&server)
        .await;

    let request = ClusterCreateRequest {
        name: String::from("edge"),
        containers_cidr: String::from("10.20.0.0/16"),
        services_cidr: String::from("10.21.0.0/16"),
        network_plugin: String::from("calico"),
        privileged: true,
        ..ClusterCreateRequest::default()
    };
    let client = client_for(&server, fast_retry);
    let uuid = client
        .create_cluster(&request, PROJECT, TOKEN)
        .await
        .unwrap_or_else(|err| panic!("cluster should be created: {err}"));

    assert_eq!(uuid, "c-1");
    let posted = server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .find(|received| received.method.as_str() == "POST")
        .unwrap_or_else(|| panic!("no create request recorded"));
    let body: serde_json::Value =
        serde_json::from_slice(&posted.body).unwrap_or_else(|err| panic!("create body: {err}"));
    assert_eq!(body.get("nodePoolUuid"), Some(&json!("pool-local")));
    assert_eq!(body.get("name"), Some(&json!("edge")));
    assert!(body.get("masterVipIpv4").is_none());
}

#[rstest]
#[tokio::test]
async fn create_cluster_rejects_a_taken_name(fast_retry: RetryPolicy) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/qbert/v3/proj-1/clusters"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "uuid": "c-0", "name": "edge" },
        ])))
        .mount(&server)
        .await;

    let request = ClusterCreateRequest {
        name: String::from("edge"),
        ..ClusterCreateRequest::default()
    };
    let client = client_for(&server, fast_retry);
    let err = client.create_cluster(&request, PROJECT, TOKEN).await.err();

    assert!(matches!(err, Some(ControlPlaneError::ClusterExists { .. })), "got {err:?}");
}

#[rstest]
#[tokio::test]
async fn attach_posts_one_batch_per_role(fast_retry: RetryPolicy) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/qbert/v3/proj-1/clusters/c-1/attach"))
        .and(body_json(json!([
            { "uuid": "host-a", "isMaster": false },
            { "uuid": "host-b", "isMaster": false },
        ])))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry);
    let nodes = vec![String::from("host-a"), String::from("host-b")];
    client
        .attach_node("c-1", PROJECT, TOKEN, &nodes, NodeRole::Worker)
        .await
        .unwrap_or_else(|err| panic!("attach should succeed: {err}"));
}

#[rstest]
#[tokio::test]
async fn installer_is_fetched_per_family(fast_retry: RetryPolicy) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clarity/platform9-install-redhat.sh"))
        .respond_with(ResponseTemplate::new(200).set_body_string("#!/bin/bash\necho install\n"))
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry);
    let script = client
        .download_installer(TOKEN, OsFamily::Rhel)
        .await
        .unwrap_or_else(|err| panic!("installer download: {err}"));

    assert!(script.starts_with(b"#!/bin/bash"));
}

#[rstest]
#[tokio::test]
async fn converge_status_retries_until_the_cluster_appears(fast_retry: RetryPolicy) {
    let server = MockServer::start().await;
    let cluster_path = "/qbert/v3/proj-1/clusters/c-1";
    Mock::given(method("GET"))
        .and(path(cluster_path))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(cluster_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uuid": "c-1", "name": "edge", "status": "pending"
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry);
    let status = client
        .get_converge_status("c-1", PROJECT, TOKEN)
        .await
        .unwrap_or_else(|err| panic!("status should be read: {err}"));

    assert_eq!(status, "pending");
    assert_eq!(requests_to(&server, cluster_path).await, 3);
}

#[rstest]
#[tokio::test]
async fn detach_posts_the_node_uuid(fast_retry: RetryPolicy) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/qbert/v3/proj-1/clusters/c-1/detach"))
        .and(header("X-Auth-Token", TOKEN))
        .and(body_json(json!([{ "uuid": "host-a" }])))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry);
    client
        .detach_node("c-1", PROJECT, TOKEN, "host-a")
        .await
        .unwrap_or_else(|err| panic!("detach should succeed: {err}"));
}

#[rstest]
#[tokio::test]
async fn delete_cluster_sends_a_delete(fast_retry: RetryPolicy) {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/qbert/v3/proj-1/clusters/c-1"))
        .and(header("X-Auth-Token", TOKEN))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry);
    client
        .delete_cluster("c-1", PROJECT, TOKEN)
        .await
        .unwrap_or_else(|err| panic!("delete should succeed: {err}"));
}

#[rstest]
#[tokio::test]
async fn deauthorize_removes_the_kube_role(fast_retry: RetryPolicy) {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(ROLE_PATH))
        .and(header("X-Auth-Token", TOKEN))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry);
    client
        .deauthorize_node("abc-123", TOKEN)
        .await
        .unwrap_or_else(|err| panic!("deauthorize should succeed: {err}"));
}

#[rstest]
#[tokio::test]
async fn deauthorize_surfaces_server_errors(fast_retry: RetryPolicy) {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(ROLE_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("resmgr unavailable"))
        .mount(&server)
        .await;

    let client = client_for(&server, fast_retry);
    let err = client.deauthorize_node("abc-123", TOKEN).await.err();

    assert!(
        matches!(&err, Some(ControlPlaneError::Status { status: 503, body, .. }) if body == "resmgr unavailable"),
        "got {err:?}"
    );
}
