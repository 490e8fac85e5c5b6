/// Integration tests for acquiring Test Object data
///
/// Covers local data, uploads, remote endpoints served by a local axum
/// server, the upload quota and path confinement.
use axum::http::StatusCode;
use axum::response::Redirect;
use axum::routing::get;
use axum::Router;
use std::fs;
use std::io::{Cursor, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use testobjects_lib::models::{
    CreateReusableTestObjectRequest, ResourceUri, TestObject, UploadFile, PROP_EMPTY_FILES,
    PROP_FILES, PROP_SIZE, PROP_SKIPPED_FILES,
};
use testobjects_lib::store::MemoryStore;
use testobjects_lib::storage::BAD_REQUEST_SENTINEL_HASH;
use testobjects_lib::{IngestConfig, TestObjectService};

fn open(config: IngestConfig) -> (TestObjectService, PathBuf) {
    let service = TestObjectService::open(config.clone(), Arc::new(MemoryStore::new())).unwrap();
    let testdata = fs::canonicalize(&config.testdata_dir).unwrap();
    (service, testdata)
}

fn data_object(uri: &str) -> TestObject {
    let mut object = TestObject::new();
    object.label = "Integration".to_string();
    object.add_resource("data", ResourceUri::parse(uri).unwrap());
    object
}

fn endpoint_object(uri: &str) -> TestObject {
    let mut object = TestObject::new();
    object.add_resource("serviceEndpoint", ResourceUri::parse(uri).unwrap());
    object
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn local_network_config(temp_dir: &TempDir) -> IngestConfig {
    let mut config = IngestConfig::with_base_dir(temp_dir.path());
    config.allow_private_net_access = true;
    config
}

fn dir_is_empty(path: &Path) -> bool {
    fs::read_dir(path).map(|mut d| d.next().is_none()).unwrap_or(true)
}

#[tokio::test]
async fn test_local_data_counts_only_qualifying_files() {
    let temp_dir = TempDir::new().unwrap();
    let (service, testdata) = open(IngestConfig::with_base_dir(temp_dir.path()));

    let set = testdata.join("set-a");
    fs::create_dir_all(&set).unwrap();
    fs::write(set.join("a.xml"), "<").unwrap();
    fs::write(set.join("b.gml"), "<b").unwrap();
    fs::write(set.join("readme.txt"), "not test data").unwrap();

    let object = service
        .init_resources_and_add(data_object("set-a"), None)
        .await
        .unwrap();

    assert_eq!(object.property(PROP_FILES), Some("2"));
    assert_eq!(object.property(PROP_SIZE), Some("3"));
    assert_eq!(object.property(PROP_SKIPPED_FILES), Some("1"));
    assert_eq!(object.property(PROP_EMPTY_FILES), None);
    assert_eq!(object.resource("data"), Some(&ResourceUri::File(set)));
    assert!(object.test_object_types.contains("xml-document"));

    let stored = service.get_by_id(object.id().unwrap()).await.unwrap();
    assert_eq!(stored.item_hash, object.item_hash);
}

#[tokio::test]
async fn test_hash_is_stable_for_unchanged_data() {
    let temp_dir = TempDir::new().unwrap();
    let (service, testdata) = open(IngestConfig::with_base_dir(temp_dir.path()));

    let set = testdata.join("stable");
    fs::create_dir_all(&set).unwrap();
    fs::write(set.join("a.xml"), "<a>1</a>").unwrap();

    let first = service
        .init_resources_and_add(data_object("stable"), None)
        .await
        .unwrap();
    let second = service
        .init_resources_and_add(data_object("stable"), None)
        .await
        .unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(first.item_hash, second.item_hash);
}

#[tokio::test]
async fn test_single_empty_file_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let (service, testdata) = open(IngestConfig::with_base_dir(temp_dir.path()));

    let set = testdata.join("set-b");
    fs::create_dir_all(&set).unwrap();
    fs::write(set.join("empty.xml"), "").unwrap();

    let err = service
        .init_resources_and_add(data_object("set-b"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "l.testObject.one.file.with.zero.size");
    assert!(err.to_string().contains("one file"));
}

#[tokio::test]
async fn test_regex_without_matches_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let (service, testdata) = open(IngestConfig::with_base_dir(temp_dir.path()));

    let set = testdata.join("set-c");
    fs::create_dir_all(&set).unwrap();
    fs::write(set.join("a.xml"), "<a/>").unwrap();

    let mut object = data_object("set-c");
    object.set_property("regex", r".*\.gml");
    let err = service
        .init_resources_and_add(object, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "l.testObject.regex.null.selection");
}

#[tokio::test]
async fn test_secured_endpoint_reports_host() {
    let temp_dir = TempDir::new().unwrap();
    let (service, _) = open(local_network_config(&temp_dir));
    let addr = serve(Router::new().route("/ows", get(|| async { StatusCode::UNAUTHORIZED }))).await;

    let url = format!("http://{}/ows?service=WFS", addr);
    let err = service
        .init_resources_and_add(endpoint_object(&url), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "l.url.secured");
    assert_eq!(err.args(), vec!["127.0.0.1".to_string()]);
}

#[tokio::test]
async fn test_endpoint_answering_bad_request_gets_sentinel_hash() {
    let temp_dir = TempDir::new().unwrap();
    let (service, _) = open(local_network_config(&temp_dir));
    let addr = serve(Router::new().route("/ows", get(|| async { StatusCode::BAD_REQUEST }))).await;

    let url = format!("http://{}/ows?service=wms", addr);
    let object = service
        .init_resources_and_add(endpoint_object(&url), None)
        .await
        .unwrap();
    assert_eq!(object.item_hash.as_deref(), Some(BAD_REQUEST_SENTINEL_HASH));
    assert!(object.test_object_types.contains("ows-service"));
    assert_eq!(object.property("serviceType"), Some("WMS"));
    assert_eq!(object.remote_resource, object.resource("serviceEndpoint").cloned());
}

#[tokio::test]
async fn test_endpoint_errors_are_classified() {
    let temp_dir = TempDir::new().unwrap();
    let (service, _) = open(local_network_config(&temp_dir));
    let app = Router::new()
        .route("/gone", get(|| async { StatusCode::NOT_FOUND }))
        .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
    let addr = serve(app).await;

    let err = service
        .init_resources_and_add(endpoint_object(&format!("http://{}/gone", addr)), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "l.url.client.error");

    let err = service
        .init_resources_and_add(endpoint_object(&format!("http://{}/broken", addr)), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "l.url.server.error");
}

#[tokio::test]
async fn test_private_endpoint_rejected_by_default() {
    let temp_dir = TempDir::new().unwrap();
    let (service, _) = open(IngestConfig::with_base_dir(temp_dir.path()));
    let addr = serve(Router::new().route("/ows", get(|| async { "<ok/>" }))).await;

    let err = service
        .init_resources_and_add(endpoint_object(&format!("http://{}/ows", addr)), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "l.rejected.private.subnet.access");
    assert_eq!(err.status(), 403);
}

#[tokio::test]
async fn test_remote_data_is_downloaded() {
    let temp_dir = TempDir::new().unwrap();
    let (service, testdata) = open(local_network_config(&temp_dir));
    let gml = r#"<wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs/2.0"/>"#;
    let addr = serve(Router::new().route("/roads.gml", get(move || async move { gml }))).await;

    let object = service
        .init_resources_and_add(data_object(&format!("http://{}/roads.gml", addr)), None)
        .await
        .unwrap();

    let id = object.id().unwrap();
    let download = object.resource("download.1").unwrap().as_path().unwrap();
    assert!(download.starts_with(testdata.join(id)));
    assert!(download.join("roads.gml").exists());
    assert_eq!(object.property(PROP_FILES), Some("1"));
    assert!(object.test_object_types.contains("gml-feature-collection"));
    assert_eq!(object.remote_resource, object.resource("data").cloned());
}

#[tokio::test]
async fn test_redirect_within_the_server_is_followed() {
    let temp_dir = TempDir::new().unwrap();
    let (service, _) = open(local_network_config(&temp_dir));
    let gml = r#"<gml:FeatureCollection xmlns:gml="http://www.opengis.net/gml/3.2"/>"#;
    let app = Router::new()
        .route("/latest", get(|| async { Redirect::temporary("/roads.gml") }))
        .route("/roads.gml", get(move || async move { gml }));
    let addr = serve(app).await;

    let object = service
        .init_resources_and_add(data_object(&format!("http://{}/latest", addr)), None)
        .await
        .unwrap();

    let download = object.resource("download.1").unwrap().as_path().unwrap();
    assert!(download.join("roads.gml").exists());
    assert_eq!(object.property(PROP_FILES), Some("1"));
}

#[tokio::test]
async fn test_redirect_target_is_checked_like_the_original_url() {
    let temp_dir = TempDir::new().unwrap();
    let (service, testdata) = open(local_network_config(&temp_dir));
    let app = Router::new().route(
        "/moved",
        get(|| async { Redirect::permanent("http://host.invalid/roads.gml") }),
    );
    let addr = serve(app).await;

    let err = service
        .init_resources_and_add(data_object(&format!("http://{}/moved", addr)), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "l.unknown.host");
    assert_eq!(err.args(), vec!["host.invalid".to_string()]);
    assert!(dir_is_empty(&testdata));
}

#[tokio::test]
async fn test_rejected_download_leaves_no_data() {
    let temp_dir = TempDir::new().unwrap();
    let config = local_network_config(&temp_dir);
    let (service, testdata) = open(config.clone());
    let addr = serve(Router::new().route("/empty.gml", get(|| async { "" }))).await;

    let err = service
        .init_resources_and_add(data_object(&format!("http://{}/empty.gml", addr)), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "l.testObject.one.file.with.zero.size");
    assert!(dir_is_empty(&testdata));
    assert!(dir_is_empty(&config.upload_dir));
}

#[tokio::test]
async fn test_unknown_host() {
    let temp_dir = TempDir::new().unwrap();
    let (service, _) = open(IngestConfig::with_base_dir(temp_dir.path()));

    let err = service
        .init_resources_and_add(endpoint_object("http://host.invalid/ows"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "l.unknown.host");
}

#[tokio::test]
async fn test_upload_over_quota_writes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = IngestConfig::with_base_dir(temp_dir.path());
    config.max_upload_size = 16;
    let (service, testdata) = open(config.clone());

    let uploads = vec![
        UploadFile::new("a.xml", Some("application/xml"), vec![b'<'; 10]),
        UploadFile::new("b.xml", Some("application/xml"), vec![b'<'; 10]),
    ];
    let request = CreateReusableTestObjectRequest {
        label: "Too big".to_string(),
        ..Default::default()
    };
    let err = service
        .create_reusable(&request, &uploads, None)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "l.max.upload.size.exceeded");
    assert_eq!(err.status(), 413);
    assert!(dir_is_empty(&testdata));
    assert!(dir_is_empty(&config.upload_dir));
}

#[tokio::test]
async fn test_data_path_cannot_escape_testdata() {
    let temp_dir = TempDir::new().unwrap();
    let (service, _) = open(IngestConfig::with_base_dir(temp_dir.path()));

    let outside = temp_dir.path().join("outside");
    fs::create_dir_all(&outside).unwrap();
    fs::write(outside.join("a.xml"), "<a/>").unwrap();

    for uri in ["../outside", "set/../../outside"] {
        let err = service
            .init_resources_and_add(data_object(uri), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "l.path.traversal", "{}", uri);
    }

    let absolute = outside.to_string_lossy().to_string();
    let err = service
        .init_resources_and_add(data_object(&absolute), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "l.path.traversal");
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_out_of_testdata_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let (service, testdata) = open(IngestConfig::with_base_dir(temp_dir.path()));

    let outside = temp_dir.path().join("outside");
    fs::create_dir_all(&outside).unwrap();
    fs::write(outside.join("a.xml"), "<a/>").unwrap();
    std::os::unix::fs::symlink(&outside, testdata.join("link")).unwrap();

    let err = service
        .init_resources_and_add(data_object("link"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "l.path.traversal");
}

#[tokio::test]
async fn test_zip_upload_with_traversal_entry_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let (service, _) = open(IngestConfig::with_base_dir(temp_dir.path()));

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("../../evil.xml", zip::write::FileOptions::default())
        .unwrap();
    zip.write_all(b"<evil/>").unwrap();
    let archive = zip.finish().unwrap().into_inner();

    let uploads = vec![UploadFile::new("bundle.zip", Some("application/zip"), archive)];
    let err = service.create_ad_hoc(&uploads, None).await.unwrap_err();
    assert_eq!(err.code(), "l.path.traversal");
    assert!(!temp_dir.path().join("evil.xml").exists());
}

#[tokio::test]
async fn test_upload_names_are_sanitized() {
    let temp_dir = TempDir::new().unwrap();
    let (service, testdata) = open(IngestConfig::with_base_dir(temp_dir.path()));

    let uploads = vec![UploadFile::new(
        "../../escape.xml",
        Some("application/xml"),
        b"<a/>".to_vec(),
    )];
    let request = CreateReusableTestObjectRequest::default();
    let response = service
        .create_reusable(&request, &uploads, None)
        .await
        .unwrap();

    assert_eq!(response.files[0].name, "escape.xml");
    let reference = response.test_object.reference.unwrap();
    let id = reference.rsplit('/').next().unwrap();
    assert!(testdata.join(id).join("upload.0/escape.xml").exists());
    assert!(!temp_dir.path().join("escape.xml").exists());
}
