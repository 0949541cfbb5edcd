use crate::core::{
    domain::{
        error::{OpsError, ResourceKind, TransientKind},
        model::{
            async_job::{CommandOutcome, JobId, JobStatus},
            control_plane_connection::ControlPlaneConnection,
            host::{OperationalState, ResourceState},
            session_auth::SessionAuth,
            workload::{WorkloadKind, WorkloadListing},
        },
        value_object::{ApiPassword, ApiUsername, ControlPlaneUrl, SessionKey},
    },
    infrastructure::{
        api_client::ApiClient,
        config::ClientSettings,
        control_plane::{ControlPlane, HttpControlPlane},
    },
};
use crate::tests::fixtures;
use serde_json::{Value, json};
use std::sync::Arc;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, query_param},
};

async fn setup_control_plane(server: &MockServer) -> HttpControlPlane {
    let connection = ControlPlaneConnection::new(
        ControlPlaneUrl::parse(&server.uri()).unwrap(),
        ApiUsername::new_unchecked("ops".to_string()),
        ApiPassword::new_unchecked("secret".to_string()),
        "/".to_string(),
        false,
    );
    let client = ApiClient::new(connection, ClientSettings::default()).unwrap();
    client
        .set_auth(SessionAuth::new(SessionKey::new_unchecked(
            "test-session".to_string(),
        )))
        .await;
    HttpControlPlane::new(Arc::new(client))
}

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

fn host_json(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "clusterid": "c1",
        "clustername": "cluster-a",
        "resourcestate": "Enabled",
        "state": "Up",
        "memorytotal": 68_719_476_736u64,
        "memoryallocated": 4_294_967_296u64,
        "ipaddress": "10.0.0.11",
        "hypervisorversion": "9.4"
    })
}

#[tokio::test]
async fn test_host_by_name_keeps_exact_match_and_adds_dedication() {
    let server = MockServer::start().await;
    let control_plane = setup_control_plane(&server).await;

    Mock::given(method("GET"))
        .and(path("/client/api"))
        .and(query_param("command", "listHosts"))
        .and(query_param("name", "kvm01"))
        .and(query_param("type", "Routing"))
        .respond_with(envelope(
            "listHosts",
            json!({"count": 2, "host": [host_json("h10", "kvm010"), host_json("h1", "kvm01")]}),
        ))
        .mount(&server)
        .await;
    mount(
        &server,
        "listDedicatedHosts",
        json!({"dedicatedhost": [{"hostid": "h1", "affinitygroupid": "ag-1"}]}),
    )
    .await;

    let host = control_plane.host_by_name("kvm01").await.unwrap();
    assert_eq!(host.id, "h1");
    assert_eq!(host.cluster_id, "c1");
    assert_eq!(host.resource_state, ResourceState::Enabled);
    assert_eq!(host.operational_state, OperationalState::Up);
    assert_eq!(host.memory_total, 64 * fixtures::GIB);
    assert_eq!(host.hypervisor_version.as_deref(), Some("9.4"));
    assert_eq!(host.dedication_group.as_deref(), Some("ag-1"));
}

#[tokio::test]
async fn test_unknown_host_is_not_found() {
    let server = MockServer::start().await;
    let control_plane = setup_control_plane(&server).await;
    mount(&server, "listHosts", json!({})).await;

    let error = control_plane.host_by_name("kvm99").await.unwrap_err();
    assert!(matches!(
        error,
        OpsError::NotFound {
            kind: ResourceKind::Host,
            ..
        }
    ));
}

#[tokio::test]
async fn test_routers_are_tagged_with_their_kind() {
    let server = MockServer::start().await;
    let control_plane = setup_control_plane(&server).await;

    Mock::given(method("GET"))
        .and(path("/client/api"))
        .and(query_param("command", "listRouters"))
        .and(query_param("hostid", "h1"))
        .and(query_param("projectid", "-1"))
        .respond_with(envelope(
            "listRouters",
            json!({"router": [{"id": "r1", "name": "r-12-VM", "hostid": "h1", "state": "Running"}]}),
        ))
        .mount(&server)
        .await;

    let routers = control_plane
        .workloads_on_host("h1", WorkloadListing::ProjectRouters)
        .await
        .unwrap();
    assert_eq!(routers.len(), 1);
    assert_eq!(routers[0].kind, WorkloadKind::Router);
    assert_eq!(routers[0].host_id.as_deref(), Some("h1"));
}

#[tokio::test]
async fn test_migration_candidates_carry_flags_and_dedication() {
    let server = MockServer::start().await;
    let control_plane = setup_control_plane(&server).await;

    let mut suitable = host_json("h2", "kvm02");
    suitable["suitableformigration"] = json!(true);
    let mut busy = host_json("h3", "kvm03");
    busy["suitableformigration"] = json!(false);
    busy["requiresStorageMotion"] = json!(true);
    Mock::given(method("GET"))
        .and(path("/client/api"))
        .and(query_param("command", "findHostsForMigration"))
        .and(query_param("virtualmachineid", "id-web01"))
        .respond_with(envelope(
            "findHostsForMigration",
            json!({"count": 2, "host": [suitable, busy]}),
        ))
        .mount(&server)
        .await;
    mount(
        &server,
        "listDedicatedHosts",
        json!({"dedicatedhost": [{"hostid": "h3", "affinitygroupid": "ag-7"}]}),
    )
    .await;

    let cluster = fixtures::cluster("cluster-a");
    let source = fixtures::host("kvm01", &cluster);
    let workload = fixtures::workload("web01", &source);
    let candidates = control_plane.migration_candidates(&workload).await.unwrap();

    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].host.name, "kvm02");
    assert!(candidates[0].suitable);
    assert!(!candidates[0].requires_storage_motion);
    assert_eq!(candidates[0].host.dedication_group, None);
    assert!(!candidates[1].suitable);
    assert!(candidates[1].requires_storage_motion);
    assert_eq!(candidates[1].host.dedication_group.as_deref(), Some("ag-7"));
}

#[tokio::test]
async fn test_migrate_with_volumes_sends_indexed_pairs() {
    let server = MockServer::start().await;
    let control_plane = setup_control_plane(&server).await;

    Mock::given(method("GET"))
        .and(path("/client/api"))
        .and(query_param("command", "migrateVirtualMachineWithVolume"))
        .and(query_param("virtualmachineid", "id-web01"))
        .and(query_param("hostid", "h9"))
        .and(query_param("migrateto[0].volume", "vol-root"))
        .and(query_param("migrateto[0].pool", "pool-a"))
        .and(query_param("migrateto[1].volume", "vol-data"))
        .and(query_param("migrateto[1].pool", "pool-b"))
        .respond_with(envelope(
            "migrateVirtualMachineWithVolume",
            json!({"jobid": "job-42"}),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let cluster = fixtures::cluster("cluster-a");
    let source = fixtures::host("kvm01", &cluster);
    let workload = fixtures::workload("web01", &source);
    let outcome = control_plane
        .migrate_workload_with_volumes(
            &workload,
            "h9",
            vec![
                ("vol-root".to_string(), "pool-a".to_string()),
                ("vol-data".to_string(), "pool-b".to_string()),
            ],
        )
        .await
        .unwrap();
    assert_eq!(outcome, CommandOutcome::Submitted(JobId::new("job-42".to_string())));
}

#[tokio::test]
async fn test_system_vm_migration_uses_system_command() {
    let server = MockServer::start().await;
    let control_plane = setup_control_plane(&server).await;

    Mock::given(method("GET"))
        .and(path("/client/api"))
        .and(query_param("command", "migrateSystemVm"))
        .and(query_param("virtualmachineid", "id-s-1-VM"))
        .respond_with(envelope("migrateSystemVm", json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let cluster = fixtures::cluster("cluster-a");
    let source = fixtures::host("kvm01", &cluster);
    let mut system_vm = fixtures::workload("s-1-VM", &source);
    system_vm.kind = WorkloadKind::SystemVm;

    let outcome = control_plane
        .migrate_workload(&system_vm, "h2")
        .await
        .unwrap();
    assert_eq!(outcome, CommandOutcome::Completed);
}

#[tokio::test]
async fn test_job_status_reports_failure_reason() {
    let server = MockServer::start().await;
    let control_plane = setup_control_plane(&server).await;

    Mock::given(method("GET"))
        .and(path("/client/api"))
        .and(query_param("command", "queryAsyncJobResult"))
        .and(query_param("jobid", "job-1"))
        .respond_with(envelope(
            "queryAsyncJobResult",
            json!({"jobstatus": 2, "jobresult": {"errorcode": 530, "errortext": "no capacity"}}),
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/client/api"))
        .and(query_param("command", "queryAsyncJobResult"))
        .and(query_param("jobid", "job-2"))
        .respond_with(envelope("queryAsyncJobResult", json!({"jobstatus": 0})))
        .mount(&server)
        .await;

    let failed = control_plane
        .job_status(&JobId::new("job-1".to_string()))
        .await
        .unwrap();
    assert_eq!(failed, JobStatus::Failed(Some("no capacity".to_string())));

    let pending = control_plane
        .job_status(&JobId::new("job-2".to_string()))
        .await
        .unwrap();
    assert_eq!(pending, JobStatus::Pending);
}

#[tokio::test]
async fn test_ambiguous_job_query_is_transient() {
    let server = MockServer::start().await;
    let control_plane = setup_control_plane(&server).await;

    mount(
        &server,
        "queryAsyncJobResult",
        json!({"errorcode": 431, "errortext": "Ambiguous response: duplicate jobstatus field"}),
    )
    .await;

    let error = control_plane
        .job_status(&JobId::new("job-1".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        OpsError::Transient(TransientKind::AmbiguousResponse)
    ));
}

#[tokio::test]
async fn test_volumes_are_ordered_by_device() {
    let server = MockServer::start().await;
    let control_plane = setup_control_plane(&server).await;

    Mock::given(method("GET"))
        .and(path("/client/api"))
        .and(query_param("command", "listVolumes"))
        .and(query_param("virtualmachineid", "vm1"))
        .respond_with(envelope(
            "listVolumes",
            json!({"volume": [
                {"id": "v2", "name": "data", "type": "DATADISK", "storageid": "p1",
                 "storage": "pool-1", "state": "Ready", "size": 10, "deviceid": 1},
                {"id": "v1", "name": "root", "type": "ROOT", "storageid": "p1",
                 "storage": "pool-1", "state": "Ready", "size": 20, "deviceid": 0}
            ]}),
        ))
        .mount(&server)
        .await;

    let volumes = control_plane.volumes("vm1").await.unwrap();
    let ids: Vec<&str> = volumes.iter().map(|v| v.id.as_str()).collect();
    assert_eq!(ids, vec!["v1", "v2"]);
}
