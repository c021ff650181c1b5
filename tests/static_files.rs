//! Static mounts served through a running gateway.

mod common;

use std::path::Path;

use common::{client, config, mount, start, stub_upstream};
use hostgate::config::model::StaticMount;

fn site() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "home").unwrap();
    std::fs::write(dir.path().join("app.html"), "app shell").unwrap();
    std::fs::write(dir.path().join("404.html"), "custom missing").unwrap();
    std::fs::create_dir(dir.path().join("docs")).unwrap();
    std::fs::write(dir.path().join("docs/index.html"), "docs home").unwrap();
    std::fs::create_dir(dir.path().join("bare")).unwrap();
    std::fs::write(dir.path().join("bare/readme.txt"), "plain").unwrap();
    dir
}

async fn get(url: String) -> (u16, String) {
    let resp = client().get(url).send().await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.text().await.unwrap())
}

#[tokio::test]
async fn serves_files_and_directory_indexes() {
    let dir = site();
    let gw = start(&config(&[], vec![mount("/site/", dir.path())])).await;

    assert_eq!(get(gw.url("/site/bare/readme.txt")).await, (200, "plain".into()));
    assert_eq!(get(gw.url("/site/")).await, (200, "home".into()));
    assert_eq!(get(gw.url("/site/docs/")).await, (200, "docs home".into()));
    assert_eq!(get(gw.url("/site/bare/")).await.0, 404);
    assert_eq!(get(gw.url("/site/nope.css")).await.0, 404);

    gw.stop().await;
}

#[tokio::test]
async fn content_type_follows_extension() {
    let dir = site();
    let gw = start(&config(&[], vec![mount("/site/", dir.path())])).await;

    let resp = client().get(gw.url("/site/index.html")).send().await.unwrap();
    let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/html"), "{content_type}");

    gw.stop().await;
}

#[tokio::test]
async fn fallback_answers_unknown_paths() {
    let dir = site();
    let spa = StaticMount {
        fallback: Some("app.html".into()),
        ..mount("/app/", dir.path())
    };
    let gw = start(&config(&[], vec![spa])).await;

    assert_eq!(get(gw.url("/app/users/42")).await, (200, "app shell".into()));
    assert_eq!(get(gw.url("/app/bare/")).await, (200, "app shell".into()));
    assert_eq!(get(gw.url("/app/docs/")).await, (200, "docs home".into()));

    gw.stop().await;
}

#[tokio::test]
async fn error_page_is_served_with_status() {
    let dir = site();
    let mut site_mount = mount("/site/", dir.path());
    site_mount.error_pages.insert(404, "404.html".into());
    let gw = start(&config(&[], vec![site_mount])).await;

    assert_eq!(get(gw.url("/site/missing")).await, (404, "custom missing".into()));

    gw.stop().await;
}

#[tokio::test]
async fn escaping_the_mount_is_not_found() {
    let dir = site();
    let gw = start(&config(&[], vec![mount("/site/", dir.path())])).await;

    assert_eq!(get(gw.url("/site/docs%2f..%2f..%2fsecret")).await.0, 404);
    assert_eq!(get(gw.url("/site/docs%5c..%5cindex.html")).await.0, 404);

    gw.stop().await;
}

#[tokio::test]
async fn repeated_gets_return_identical_bodies() {
    let gw = start(&config(&[], vec![mount("/public/", Path::new("testdata/public"))])).await;
    let http = client();

    let first = http.get(gw.url("/public/index.html")).send().await.unwrap();
    let first = first.bytes().await.unwrap();
    let second = http.get(gw.url("/public/index.html")).send().await.unwrap();
    let second = second.bytes().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(&first[..], b"test");

    gw.stop().await;
}

#[tokio::test]
async fn favicon_without_icon_is_no_content() {
    let dir = site();
    let gw = start(&config(&[], vec![mount("/site/", dir.path())])).await;

    let (status, body) = get(gw.url("/favicon.ico")).await;
    assert_eq!(status, 204);
    assert!(body.is_empty());

    gw.stop().await;
}

#[tokio::test]
async fn favicon_comes_from_first_mount_that_has_one() {
    let first = site();
    let second = tempfile::tempdir().unwrap();
    std::fs::write(second.path().join("favicon.ico"), "icon").unwrap();
    let gw = start(&config(
        &[],
        vec![mount("/one/", first.path()), mount("/two/", second.path())],
    ))
    .await;

    assert_eq!(get(gw.url("/favicon.ico")).await, (200, "icon".into()));

    gw.stop().await;
}

#[tokio::test]
async fn static_mount_takes_precedence_over_host() {
    let a = stub_upstream("alpha").await;
    let gw = start(&config(
        &[("a.local", a)],
        vec![mount("/public/", Path::new("testdata/public"))],
    ))
    .await;
    let http = client();

    let resp = http
        .get(gw.url("/public/index.html"))
        .header("host", "a.local")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "test");

    let resp = http
        .get(gw.url("/elsewhere"))
        .header("host", "a.local")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "alpha /elsewhere");

    // static responses are not access-logged
    gw.logs.wait_for("access_log", 1).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(gw.logs.records("access_log").len(), 1);

    gw.stop().await;
}

#[tokio::test]
async fn favicon_is_not_swallowed_by_root_fallback_mount() {
    let dir = site();
    let spa = StaticMount {
        fallback: Some("app.html".into()),
        ..mount("/", dir.path())
    };
    let gw = start(&config(&[], vec![spa])).await;

    let (status, body) = get(gw.url("/favicon.ico")).await;
    assert_eq!(status, 204);
    assert!(body.is_empty());
    assert_eq!(get(gw.url("/deep/link")).await, (200, "app shell".into()));

    gw.stop().await;
}

#[tokio::test]
async fn favicon_for_known_host_is_proxied() {
    let a = stub_upstream("alpha").await;
    let dir = site();
    let gw = start(&config(&[("a.local", a)], vec![mount("/", dir.path())])).await;

    let resp = client()
        .get(gw.url("/favicon.ico"))
        .header("host", "a.local")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "alpha /favicon.ico");

    gw.stop().await;
}
