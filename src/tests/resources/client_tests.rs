use crate::core::infrastructure::{
    control_plane::{ControlPlane, MockControlPlane},
    datastore::MockDatastore,
    hypervisor::MockHypervisor,
    remote_shell::MockRemoteShell,
};
use crate::tests::fixtures;
use crate::{
    AppConfig, DrainRequest, MaintenanceRequest, MigrateVolumeRequest, OpsError, RebootAction,
    SkipReason, StackOpsClient, StackOpsClientBuilder, Timing,
};
use serde_json::{Value, json};
use std::sync::Arc;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, query_param},
};

fn envelope(command: &str, body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        format!("{}response", command.to_ascii_lowercase()): body
    }))
}

async fn mount(server: &MockServer, command: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path("/client/api"))
        .and(query_param("command", command))
        .respond_with(envelope(command, body))
        .mount(server)
        .await;
}

async fn setup_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/client/api"))
        .and(query_param("command", "login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "loginresponse": {"sessionkey": "c2Vzc2lvbg", "username": "ops"}
        })))
        .mount(&server)
        .await;
    server
}

fn test_config(url: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.control_plane.url = url.to_string();
    config.control_plane.username = "ops".to_string();
    config.control_plane.password = "secret".to_string();
    config
}

/// HTTP control plane, with the host-side collaborators mocked out.
fn http_client(server: &MockServer, dry_run: bool) -> StackOpsClient {
    StackOpsClient::builder()
        .config(test_config(&server.uri()))
        .dry_run(dry_run)
        .timing(Timing::immediate())
        .shell(Arc::new(MockRemoteShell::new()))
        .hypervisor(Arc::new(MockHypervisor::new()))
        .build()
        .unwrap()
}

/// kvm01 with one running VM, and kvm02 offered as the only migration target.
async fn mount_drainable_host(server: &MockServer) {
    let host = |id: &str, name: &str| {
        json!({
            "id": id, "name": name, "clusterid": "c1", "clustername": "cluster-a",
            "resourcestate": "Enabled", "state": "Up",
            "memorytotal": 68_719_476_736u64, "memoryallocated": 0
        })
    };
    Mock::given(method("GET"))
        .and(path("/client/api"))
        .and(query_param("command", "listHosts"))
        .and(query_param("name", "kvm01"))
        .respond_with(envelope("listHosts", json!({"host": [host("h1", "kvm01")]})))
        .mount(server)
        .await;
    mount(server, "listDedicatedHosts", json!({})).await;
    mount(
        server,
        "listVirtualMachines",
        json!({"virtualmachine": [{
            "id": "vm1", "name": "web01", "instancename": "i-2-10-VM",
            "hostid": "h1", "hostname": "kvm01", "state": "Running",
            "memory": 1024, "serviceofferingid": "so1"
        }]}),
    )
    .await;
    mount(server, "listRouters", json!({})).await;
    mount(server, "listSystemVms", json!({})).await;

    let mut target = host("h2", "kvm02");
    target["suitableformigration"] = json!(true);
    mount(server, "findHostsForMigration", json!({"host": [target]})).await;
}

#[test]
fn test_build_requires_config() {
    let result = StackOpsClientBuilder::default().build();
    assert!(matches!(result, Err(OpsError::Validation { .. })));
}

#[test]
fn test_build_rejects_invalid_control_plane_url() {
    let result = StackOpsClient::builder()
        .config(test_config("ftp://cloud.example.com"))
        .build();
    assert!(matches!(result, Err(OpsError::Validation { .. })));
}

#[test]
fn test_clients_start_in_dry_run() {
    let client = StackOpsClient::builder()
        .config(test_config("https://cloud.example.com"))
        .build()
        .unwrap();
    assert!(client.is_dry_run());
}

#[tokio::test]
async fn test_login_opens_session() {
    let server = setup_server().await;
    let client = http_client(&server, true);

    assert!(!client.is_authenticated().await);
    client.login().await.unwrap();
    assert!(client.is_authenticated().await);
}

#[tokio::test]
async fn test_drain_host_disables_and_migrates_over_http() {
    let server = setup_server().await;
    mount_drainable_host(&server).await;
    Mock::given(method("GET"))
        .and(path("/client/api"))
        .and(query_param("command", "updateHost"))
        .and(query_param("id", "h1"))
        .and(query_param("allocationstate", "Disable"))
        .respond_with(envelope("updateHost", json!({"host": {"id": "h1"}})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/client/api"))
        .and(query_param("command", "migrateVirtualMachine"))
        .and(query_param("virtualmachineid", "vm1"))
        .and(query_param("hostid", "h2"))
        .respond_with(envelope("migrateVirtualMachine", json!({"jobid": "job-1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/client/api"))
        .and(query_param("command", "queryAsyncJobResult"))
        .and(query_param("jobid", "job-1"))
        .respond_with(envelope("queryAsyncJobResult", json!({"jobstatus": 1})))
        .mount(&server)
        .await;

    let client = http_client(&server, false);
    let report = client
        .drain_host(&DrainRequest {
            host: "kvm01".to_string(),
            target: None,
        })
        .await
        .unwrap();

    assert_eq!(report.host, "kvm01");
    assert_eq!(report.total, 1);
    assert_eq!(report.succeeded, 1);
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_dry_run_drain_sends_no_migration() {
    let server = setup_server().await;
    mount_drainable_host(&server).await;
    Mock::given(method("GET"))
        .and(path("/client/api"))
        .and(query_param("command", "migrateVirtualMachine"))
        .respond_with(envelope("migrateVirtualMachine", json!({"jobid": "job-1"})))
        .expect(0)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/client/api"))
        .and(query_param("command", "updateHost"))
        .respond_with(envelope("updateHost", json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let client = http_client(&server, true);
    let report = client
        .drain_host(&DrainRequest {
            host: "kvm01".to_string(),
            target: None,
        })
        .await
        .unwrap();
    assert_eq!(report.succeeded, 1);
}

#[tokio::test]
async fn test_migrate_volume_already_on_pool_is_a_no_op() {
    let server = setup_server().await;
    mount(
        &server,
        "listVolumes",
        json!({"volume": [{
            "id": "v1", "name": "data-1", "type": "DATADISK", "storageid": "p1",
            "storage": "pool-1", "state": "Ready", "size": 10_737_418_240u64
        }]}),
    )
    .await;
    mount(
        &server,
        "listStoragePools",
        json!({"storagepool": [{
            "id": "p1", "name": "pool-1", "scope": "CLUSTER",
            "clusterid": "c1", "zoneid": "z1", "state": "Up"
        }]}),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/client/api"))
        .and(query_param("command", "migrateVolume"))
        .respond_with(envelope("migrateVolume", json!({"jobid": "job-1"})))
        .expect(0)
        .mount(&server)
        .await;

    let client = http_client(&server, false);
    let moved = client
        .migrate_volume(&MigrateVolumeRequest {
            volume_id: "v1".to_string(),
            pool: "pool-1".to_string(),
        })
        .await
        .unwrap();
    assert!(moved);
}

#[tokio::test]
async fn test_injected_collaborators_skip_login() {
    let cluster = fixtures::cluster("cluster-a");
    let hosts = vec![
        fixtures::host("kvm01", &cluster),
        fixtures::host("kvm02", &cluster),
    ];

    let mut control_plane = MockControlPlane::new();
    let found = cluster.clone();
    control_plane
        .expect_cluster_by_name()
        .returning(move |_| Ok(found.clone()));
    control_plane
        .expect_cluster_hosts()
        .returning(move |_| Ok(hosts.clone()));
    let control_plane: Arc<dyn ControlPlane> = Arc::new(control_plane);

    let client = StackOpsClient::builder()
        .config(AppConfig::default())
        .timing(Timing::immediate())
        .control_plane(control_plane)
        .shell(Arc::new(MockRemoteShell::new()))
        .hypervisor(Arc::new(MockHypervisor::new()))
        .datastore(Arc::new(MockDatastore::new()))
        .build()
        .unwrap();

    client.login().await.unwrap();
    assert!(client.is_authenticated().await);

    let report = client
        .rolling_maintenance(&MaintenanceRequest {
            cluster: "cluster-a".to_string(),
            action: RebootAction::SkipReboot,
            ignore_hosts: vec!["kvm01".to_string(), "kvm02".to_string()],
            ..MaintenanceRequest::default()
        })
        .await
        .unwrap();

    assert_eq!(report.cluster, "cluster-a");
    assert!(report.processed.is_empty());
    assert_eq!(report.skipped.len(), 2);
    assert!(report.skipped.iter().all(|s| s.reason == SkipReason::Ignored));
}
