use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use wharf_meta::{
    ClusterDirectory, ErrorKind, HostRegistry, MetaError, MetaStore, MigrationCoordinator,
    MigrationMode, MigrationSettings, Node, ReplicationCoordinator, Topology,
};

/// Body of `PUT /api/hosts/nodes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterHostRequest {
    /// Proxy address fronting the nodes
    pub proxy_address: String,
    /// Node addresses to register under the proxy
    pub nodes: Vec<String>,
}

/// One host with the epoch its detail was read at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDetail {
    /// Proxy address
    pub address: String,
    /// Store epoch at read time
    pub epoch: u64,
    /// Nodes fronted by the proxy
    pub nodes: Vec<Node>,
}

/// One cluster with the epoch its detail was read at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDetail {
    /// Cluster name
    pub name: String,
    /// Store epoch at read time
    pub epoch: u64,
    /// Member nodes, masters and replicas alike
    pub nodes: Vec<Node>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorKind,
    message: String,
}

/// The control-plane HTTP surface: stateless handlers translating requests
/// into calls against the broker components.
#[derive(Clone)]
pub struct BrokerApi {
    store: Arc<MetaStore>,
    hosts: HostRegistry,
    clusters: ClusterDirectory,
    migrations: MigrationCoordinator,
    replications: ReplicationCoordinator,
}

impl BrokerApi {
    /// Wires the API against `store` with the given migration tuning.
    pub fn new(store: Arc<MetaStore>, settings: MigrationSettings) -> Self {
        Self {
            hosts: HostRegistry::new(store.clone()),
            clusters: ClusterDirectory::new(store.clone()),
            migrations: MigrationCoordinator::new(store.clone(), settings),
            replications: ReplicationCoordinator::new(store.clone()),
            store,
        }
    }

    /// The statically enumerated route table.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/api/metadata", get(get_metadata))
            .route("/api/hosts/nodes", put(put_host_nodes))
            .route("/api/hosts/nodes/:proxy/:node", delete(delete_host_node))
            .route("/api/hosts/addresses", get(get_host_addresses))
            .route("/api/hosts/address/:address", get(get_host))
            .route(
                "/api/clusters/:name",
                post(post_cluster).delete(delete_cluster),
            )
            .route("/api/clusters/:name/nodes", post(post_cluster_node))
            .route(
                "/api/clusters/:name/nodes/:proxy/:node",
                delete(delete_cluster_node),
            )
            .route("/api/clusters/names", get(get_cluster_names))
            .route("/api/clusters/names/:name", get(get_cluster))
            .route(
                "/api/migrations/half/:cluster/:src/:dst",
                post(post_migration_half),
            )
            .route(
                "/api/migrations/all/:cluster/:src/:dst",
                post(post_migration_all),
            )
            .route(
                "/api/migrations/:cluster/:src/:dst",
                delete(delete_migration),
            )
            .route(
                "/api/replications/:cluster/:master/:replica",
                post(post_replication),
            )
            .with_state(self)
    }

    /// Binds the configured address and serves the router until shutdown.
    pub async fn serve(self, bind_addr: std::net::SocketAddr) -> anyhow::Result<()> {
        let router = Arc::new(self).router();
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        tracing::info!("Broker API listening on {}", bind_addr);
        axum::serve(listener, router.into_make_service()).await?;
        Ok(())
    }
}

fn fail(err: MetaError) -> Response {
    let status = match err.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::InvalidState => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!(error = %err, status = %status, "request rejected");
    (
        status,
        Json(ErrorBody {
            error: err.kind(),
            message: err.to_string(),
        }),
    )
        .into_response()
}

fn host_detail(topology: &Topology, address: &str) -> Option<HostDetail> {
    topology.hosts.get(address).map(|host| HostDetail {
        address: host.proxy_address.clone(),
        epoch: topology.epoch,
        nodes: host.nodes.values().cloned().collect(),
    })
}

fn cluster_detail(topology: &Topology, name: &str) -> Option<ClusterDetail> {
    topology.clusters.get(name).map(|cluster| ClusterDetail {
        name: cluster.name.clone(),
        epoch: topology.epoch,
        nodes: cluster
            .nodes
            .iter()
            .filter_map(|address| topology.node(address).cloned())
            .collect(),
    })
}

async fn get_metadata(State(api): State<Arc<BrokerApi>>) -> Response {
    let snapshot = api.store.snapshot();
    Json(&*snapshot).into_response()
}

async fn put_host_nodes(
    State(api): State<Arc<BrokerApi>>,
    Json(request): Json<RegisterHostRequest>,
) -> Response {
    match api
        .hosts
        .register_host(&request.proxy_address, request.nodes)
        .await
    {
        Ok(host) => Json(serde_json::json!({ "host": host })).into_response(),
        Err(e) => fail(e),
    }
}

async fn delete_host_node(
    State(api): State<Arc<BrokerApi>>,
    Path((proxy, node)): Path<(String, String)>,
) -> Response {
    match api.hosts.remove_node(&proxy, &node).await {
        Ok(()) => {
            let host = api.store.read(|t| host_detail(t, &proxy));
            Json(serde_json::json!({ "host": host })).into_response()
        }
        Err(e) => fail(e),
    }
}

async fn get_host_addresses(State(api): State<Arc<BrokerApi>>) -> Response {
    let addresses = api.hosts.list_addresses();
    Json(serde_json::json!({ "addresses": addresses })).into_response()
}

async fn get_host(
    State(api): State<Arc<BrokerApi>>,
    Path(address): Path<String>,
) -> Response {
    match api.store.read(|t| host_detail(t, &address)) {
        Some(host) => Json(serde_json::json!({ "host": host })).into_response(),
        None => fail(MetaError::HostNotFound(address)),
    }
}

async fn post_cluster(
    State(api): State<Arc<BrokerApi>>,
    Path(name): Path<String>,
) -> Response {
    match api.clusters.create_cluster(&name).await {
        Ok(_) => {
            let cluster = api.store.read(|t| cluster_detail(t, &name));
            Json(serde_json::json!({ "cluster": cluster })).into_response()
        }
        Err(e) => fail(e),
    }
}

async fn delete_cluster(
    State(api): State<Arc<BrokerApi>>,
    Path(name): Path<String>,
) -> Response {
    match api.clusters.delete_cluster(&name).await {
        Ok(()) => Json(serde_json::json!({ "status": "ok" })).into_response(),
        Err(e) => fail(e),
    }
}

async fn post_cluster_node(
    State(api): State<Arc<BrokerApi>>,
    Path(name): Path<String>,
) -> Response {
    match api.clusters.add_node(&name).await {
        Ok(node) => Json(serde_json::json!({ "node": node })).into_response(),
        Err(e) => fail(e),
    }
}

async fn delete_cluster_node(
    State(api): State<Arc<BrokerApi>>,
    Path((name, proxy, node)): Path<(String, String, String)>,
) -> Response {
    match api.clusters.remove_node(&name, &proxy, &node).await {
        Ok(()) => {
            let cluster = api.store.read(|t| cluster_detail(t, &name));
            Json(serde_json::json!({ "cluster": cluster })).into_response()
        }
        Err(e) => fail(e),
    }
}

async fn get_cluster_names(State(api): State<Arc<BrokerApi>>) -> Response {
    let names = api.clusters.list_names();
    Json(serde_json::json!({ "names": names })).into_response()
}

async fn get_cluster(
    State(api): State<Arc<BrokerApi>>,
    Path(name): Path<String>,
) -> Response {
    match api.store.read(|t| cluster_detail(t, &name)) {
        Some(cluster) => Json(serde_json::json!({ "cluster": cluster })).into_response(),
        None => fail(MetaError::ClusterNotFound(name)),
    }
}

async fn post_migration_half(
    State(api): State<Arc<BrokerApi>>,
    Path((cluster, src, dst)): Path<(String, String, String)>,
) -> Response {
    start_migration(&api, &cluster, &src, &dst, MigrationMode::Half).await
}

async fn post_migration_all(
    State(api): State<Arc<BrokerApi>>,
    Path((cluster, src, dst)): Path<(String, String, String)>,
) -> Response {
    start_migration(&api, &cluster, &src, &dst, MigrationMode::All).await
}

async fn start_migration(
    api: &BrokerApi,
    cluster: &str,
    src: &str,
    dst: &str,
    mode: MigrationMode,
) -> Response {
    match api.migrations.start_migration(cluster, src, dst, mode).await {
        Ok(migration) => Json(serde_json::json!({ "migration": migration })).into_response(),
        Err(e) => fail(e),
    }
}

async fn delete_migration(
    State(api): State<Arc<BrokerApi>>,
    Path((cluster, src, dst)): Path<(String, String, String)>,
) -> Response {
    match api.migrations.stop_migration(&cluster, &src, &dst).await {
        Ok(migration) => Json(serde_json::json!({ "migration": migration })).into_response(),
        Err(e) => fail(e),
    }
}

async fn post_replication(
    State(api): State<Arc<BrokerApi>>,
    Path((cluster, master, replica)): Path<(String, String, String)>,
) -> Response {
    match api
        .replications
        .assign_replica(&cluster, &master, &replica)
        .await
    {
        Ok(pair) => Json(serde_json::json!({ "replication": pair })).into_response(),
        Err(e) => fail(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_api() -> Router {
        let store = Arc::new(MetaStore::new());
        let settings = MigrationSettings {
            tick: std::time::Duration::from_secs(60),
            steps: 10,
            split: wharf_meta::SplitPolicy::Midpoint,
        };
        Arc::new(BrokerApi::new(store, settings)).router()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn method(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn put_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn register_host(router: &Router, proxy: &str, nodes: &[&str]) {
        let request = put_json(
            "/api/hosts/nodes",
            serde_json::json!({ "proxy_address": proxy, "nodes": nodes }),
        );
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metadata_snapshot_starts_empty() {
        let router = test_api();
        let response = router.oneshot(get("/api/metadata")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["epoch"], 0);
        assert!(json["hosts"].as_object().unwrap().is_empty());
        assert!(json["migrations"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_host_and_read_back() {
        let router = test_api();
        register_host(&router, "127.0.0.1:7000", &["127.0.0.1:6000"]).await;

        let response = router
            .clone()
            .oneshot(get("/api/hosts/addresses"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["addresses"], serde_json::json!(["127.0.0.1:7000"]));

        let response = router
            .oneshot(get("/api/hosts/address/127.0.0.1:7000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["host"]["address"], "127.0.0.1:7000");
        assert_eq!(json["host"]["nodes"][0]["role"], "free");
    }

    #[tokio::test]
    async fn test_unknown_host_maps_to_not_found() {
        let router = test_api();
        let response = router
            .oneshot(get("/api/hosts/address/10.0.0.9:7000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"], "not_found");
    }

    #[tokio::test]
    async fn test_conflicting_registration_maps_to_conflict() {
        let router = test_api();
        register_host(&router, "127.0.0.1:7000", &["127.0.0.1:6000"]).await;
        let request = put_json(
            "/api/hosts/nodes",
            serde_json::json!({
                "proxy_address": "127.0.0.2:7000",
                "nodes": ["127.0.0.1:6000"],
            }),
        );
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["error"], "conflict");
    }

    #[tokio::test]
    async fn test_cluster_create_assign_and_detail() {
        let router = test_api();
        register_host(&router, "127.0.0.1:7000", &["127.0.0.1:6000"]).await;

        let response = router
            .clone()
            .oneshot(method("POST", "/api/clusters/testdb"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .clone()
            .oneshot(method("POST", "/api/clusters/testdb/nodes"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["node"]["address"], "127.0.0.1:6000");
        assert_eq!(json["node"]["role"], "master");

        let response = router
            .clone()
            .oneshot(get("/api/clusters/names"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["names"], serde_json::json!(["testdb"]));

        let response = router
            .oneshot(get("/api/clusters/names/testdb"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["cluster"]["name"], "testdb");
        assert_eq!(json["cluster"]["nodes"][0]["slots"][0]["start"], 0);
        assert_eq!(json["cluster"]["nodes"][0]["slots"][0]["end"], 16383);
    }

    #[tokio::test]
    async fn test_assign_without_free_node_maps_to_service_unavailable() {
        let router = test_api();
        let response = router
            .clone()
            .oneshot(method("POST", "/api/clusters/testdb"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = router
            .oneshot(method("POST", "/api/clusters/testdb/nodes"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["error"], "resource_exhausted");
    }

    #[tokio::test]
    async fn test_remove_assigned_node_from_host_is_invalid_state() {
        let router = test_api();
        register_host(&router, "127.0.0.1:7000", &["127.0.0.1:6000"]).await;
        router
            .clone()
            .oneshot(method("POST", "/api/clusters/testdb"))
            .await
            .unwrap();
        router
            .clone()
            .oneshot(method("POST", "/api/clusters/testdb/nodes"))
            .await
            .unwrap();

        let response = router
            .clone()
            .oneshot(method(
                "DELETE",
                "/api/hosts/nodes/127.0.0.1:7000/127.0.0.1:6000",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = body_json(response).await;
        assert_eq!(json["error"], "invalid_state");

        // Detach from the cluster first, then host removal passes.
        let response = router
            .clone()
            .oneshot(method(
                "DELETE",
                "/api/clusters/testdb/nodes/127.0.0.1:7000/127.0.0.1:6000",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(method(
                "DELETE",
                "/api/hosts/nodes/127.0.0.1:7000/127.0.0.1:6000",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["host"].is_null());
    }

    #[tokio::test]
    async fn test_migration_start_and_stop_roundtrip() {
        let router = test_api();
        register_host(
            &router,
            "127.0.0.1:7000",
            &["127.0.0.1:6000", "127.0.0.1:6001"],
        )
        .await;
        router
            .clone()
            .oneshot(method("POST", "/api/clusters/testdb"))
            .await
            .unwrap();
        for _ in 0..2 {
            router
                .clone()
                .oneshot(method("POST", "/api/clusters/testdb/nodes"))
                .await
                .unwrap();
        }

        let response = router
            .clone()
            .oneshot(method(
                "POST",
                "/api/migrations/half/testdb/127.0.0.1:6000/127.0.0.1:6001",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["migration"]["status"], "running");
        assert_eq!(json["migration"]["mode"], "half");

        // Same pair again while active: rejected, not queued.
        let response = router
            .clone()
            .oneshot(method(
                "POST",
                "/api/migrations/half/testdb/127.0.0.1:6000/127.0.0.1:6001",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = router
            .clone()
            .oneshot(method(
                "DELETE",
                "/api/migrations/testdb/127.0.0.1:6000/127.0.0.1:6001",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["migration"]["status"], "cancelled");

        let response = router.oneshot(get("/api/metadata")).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json["migrations"][0]["status"], "cancelled");
    }

    #[tokio::test]
    async fn test_stop_without_active_migration_is_not_found() {
        let router = test_api();
        let response = router
            .oneshot(method(
                "DELETE",
                "/api/migrations/testdb/127.0.0.1:6000/127.0.0.1:6001",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_replication_endpoint() {
        let router = test_api();
        register_host(&router, "127.0.0.1:7000", &["127.0.0.1:6000"]).await;
        register_host(&router, "127.0.0.2:7000", &["127.0.0.2:6002"]).await;
        router
            .clone()
            .oneshot(method("POST", "/api/clusters/testdb"))
            .await
            .unwrap();
        router
            .clone()
            .oneshot(method("POST", "/api/clusters/testdb/nodes"))
            .await
            .unwrap();

        let response = router
            .clone()
            .oneshot(method(
                "POST",
                "/api/replications/testdb/127.0.0.1:6000/127.0.0.2:6002",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["replication"]["master_node"], "127.0.0.1:6000");
        assert_eq!(json["replication"]["replica_node"], "127.0.0.2:6002");

        let response = router.oneshot(get("/api/metadata")).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json["replications"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_nonempty_cluster_rejected() {
        let router = test_api();
        register_host(&router, "127.0.0.1:7000", &["127.0.0.1:6000"]).await;
        router
            .clone()
            .oneshot(method("POST", "/api/clusters/testdb"))
            .await
            .unwrap();
        router
            .clone()
            .oneshot(method("POST", "/api/clusters/testdb/nodes"))
            .await
            .unwrap();

        let response = router
            .oneshot(method("DELETE", "/api/clusters/testdb"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
