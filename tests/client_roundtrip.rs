use data_bank::{
    AppConfig, AppState, ClientError, DataBankClient, DownloadOptions, RetryPolicy,
    digest::sha256_hex, routes::routes::app,
};
use std::collections::BTreeSet;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Start a server on an ephemeral port and return its base URL.
async fn spawn_server(configure: impl FnOnce(&mut AppConfig)) -> (TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = AppConfig::for_root(dir.path().join("store"));
    configure(&mut cfg);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(AppState::from_config(cfg));
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (dir, format!("http://{addr}"))
}

fn client(base_url: &str) -> DataBankClient {
    DataBankClient::builder(base_url)
        .retry(RetryPolicy::none())
        .build()
        .unwrap()
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn resume() -> DownloadOptions {
    DownloadOptions {
        resume: true,
        verify_etag: true,
    }
}

#[tokio::test]
async fn upload_head_info_download_delete() {
    let (dir, base) = spawn_server(|_| {}).await;
    let client = client(&base);
    let data = b"hello world".repeat(3);

    let meta = client
        .upload(data.clone(), "hello.txt", "text/plain")
        .await
        .unwrap();
    assert_eq!(meta.file_id, sha256_hex(&data));
    assert_eq!(meta.size_bytes, 33);

    let head = client.head(&meta.file_id, None).await.unwrap();
    assert_eq!(head.size, 33);
    assert_eq!(head.etag.as_deref(), Some(meta.file_id.as_str()));
    assert_eq!(head.content_type.as_deref(), Some("text/plain"));

    let info = client.info(&meta.file_id).await.unwrap();
    assert_eq!(info.size, 33);
    assert_eq!(info.sha256, meta.file_id);

    let dest = dir.path().join("downloads/nested/hello.txt");
    let head = client
        .download(&meta.file_id, &dest, DownloadOptions::default())
        .await
        .unwrap();
    assert_eq!(head.size, 33);
    assert_eq!(std::fs::read(&dest).unwrap(), data);

    client.delete(&meta.file_id).await.unwrap();
    let err = client.head(&meta.file_id, None).await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound(_)));
    assert_eq!(err.status(), Some(404));

    // Non-strict deletes are idempotent.
    client.delete(&meta.file_id).await.unwrap();
}

#[tokio::test]
async fn upload_file_streams_from_disk() {
    let (dir, base) = spawn_server(|_| {}).await;
    let client = client(&base);
    let data = payload(3 * 1024 * 1024 + 17);
    let src = dir.path().join("big.bin");
    std::fs::write(&src, &data).unwrap();

    let meta = client
        .upload_file(&src, "application/octet-stream")
        .await
        .unwrap();
    assert_eq!(meta.file_id, sha256_hex(&data));
    assert_eq!(meta.size_bytes, data.len() as u64);

    let dest = dir.path().join("copy.bin");
    client
        .download(&meta.file_id, &dest, DownloadOptions::default())
        .await
        .unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), data);
}

#[tokio::test]
async fn resume_completes_a_partial_file() {
    let (dir, base) = spawn_server(|_| {}).await;
    let client = client(&base);
    let data = payload(200_000);
    let id = client
        .upload(data.clone(), "data.bin", "application/octet-stream")
        .await
        .unwrap()
        .file_id;

    let dest = dir.path().join("partial.bin");
    std::fs::write(&dest, &data[..75_000]).unwrap();

    client.download(&id, &dest, resume()).await.unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), data);
}

#[tokio::test]
async fn complete_local_file_is_not_transferred_again() {
    let (dir, base) = spawn_server(|_| {}).await;
    let client = client(&base);
    let data = payload(4096);
    let id = client
        .upload(data.clone(), "data.bin", "application/octet-stream")
        .await
        .unwrap()
        .file_id;

    // Same length, different bytes: only verification can tell.
    let dest = dir.path().join("local.bin");
    let corrupted: Vec<u8> = data.iter().map(|b| b ^ 0xff).collect();
    std::fs::write(&dest, &corrupted).unwrap();

    let no_verify = DownloadOptions {
        resume: true,
        verify_etag: false,
    };
    client.download(&id, &dest, no_verify).await.unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), corrupted);

    let err = client.download(&id, &dest, resume()).await.unwrap_err();
    match err {
        ClientError::Integrity { expected, actual } => {
            assert_eq!(expected, id);
            assert_eq!(actual, sha256_hex(&corrupted));
        }
        other => panic!("expected integrity error, got {other:?}"),
    }

    // Without resume the file is fetched from scratch.
    client
        .download(&id, &dest, DownloadOptions::default())
        .await
        .unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), data);
}

#[tokio::test]
async fn longer_local_file_surfaces_range_error() {
    let (dir, base) = spawn_server(|_| {}).await;
    let client = client(&base);
    let id = client
        .upload(&b"short"[..], "s.txt", "text/plain")
        .await
        .unwrap()
        .file_id;

    let dest = dir.path().join("long.txt");
    std::fs::write(&dest, b"much longer than the remote").unwrap();

    let err = client.download(&id, &dest, resume()).await.unwrap_err();
    assert!(matches!(err, ClientError::RangeNotSatisfiable(_)));
    let response = err.response().unwrap();
    assert_eq!(response.status, 416);
    assert_eq!(response.code(), Some("RANGE_NOT_SATISFIABLE"));
}

#[tokio::test]
async fn auth_and_limit_errors_are_typed() {
    let (_dir, base) = spawn_server(|cfg| {
        cfg.api_keys.upload = BTreeSet::from(["secret".to_string()]);
        cfg.max_file_bytes = 4;
    })
    .await;

    let anonymous = DataBankClient::builder(&base)
        .request_id("rid-auth")
        .retry(RetryPolicy::none())
        .build()
        .unwrap();
    let err = anonymous
        .upload(&b"data"[..], "d", "text/plain")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Authorization(_)));
    let response = err.response().unwrap();
    assert_eq!(response.request_id.as_deref(), Some("rid-auth"));
    assert_eq!(
        response.body.as_ref().and_then(|b| b.request_id.as_deref()),
        Some("rid-auth")
    );

    let wrong = DataBankClient::new(&base, Some("nope".into())).unwrap();
    let err = wrong.upload(&b"data"[..], "d", "text/plain").await.unwrap_err();
    assert!(matches!(err, ClientError::Forbidden(_)));

    let right = DataBankClient::new(&base, Some("secret".into())).unwrap();
    let err = right
        .upload(&b"too big"[..], "d", "text/plain")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::TooLarge(_)));

    let err = right
        .upload(&b"ok"[..], "d", "not a mime type")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidContentType(_)));

    let err = right.info("zz").await.unwrap_err();
    assert!(matches!(err, ClientError::BadRequest(_)));
}
