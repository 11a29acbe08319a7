use axum::http::{header, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use rewrite_proxy::fetcher::{FetchError, FetchOptions, FetchSettings, OriginFetcher, UpstreamBody};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use url::Url;

async fn spawn_origin(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn settings() -> FetchSettings {
    FetchSettings {
        max_redirects: 5,
        max_retries: 3,
        timeout: Duration::from_secs(5),
        retry_backoff: Duration::from_millis(10),
        loop_guard: Duration::ZERO,
        guard_retention: Duration::from_secs(60),
    }
}

fn url(addr: SocketAddr, path: &str) -> Url {
    Url::parse(&format!("http://{addr}{path}")).unwrap()
}

#[tokio::test]
async fn always_redirecting_origin_hits_the_bound() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let origin = spawn_origin(Router::new().route(
        "/loop",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (StatusCode::FOUND, [(header::LOCATION, "/loop")])
            }
        }),
    ))
    .await;

    let fetcher = OriginFetcher::new(settings()).unwrap();
    let err = fetcher
        .fetch(url(origin, "/loop"), FetchOptions::get())
        .await
        .unwrap_err();

    let FetchError::TooManyRedirects { chain, .. } = err else {
        panic!("expected TooManyRedirects, got {err:?}");
    };
    assert_eq!(hits.load(Ordering::SeqCst), 5);
    assert_eq!(chain.len(), 5);
}

#[tokio::test]
async fn closed_port_exhausts_retries() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let fetcher = OriginFetcher::new(settings()).unwrap();
    let err = fetcher
        .fetch(url(addr, "/"), FetchOptions::get())
        .await
        .unwrap_err();
    assert!(
        matches!(err, FetchError::MaxRetriesExceeded { attempts: 3, .. }),
        "{err:?}"
    );
}

#[tokio::test]
async fn see_other_after_post_continues_as_get() {
    let origin = spawn_origin(
        Router::new()
            .route(
                "/submit",
                post(|| async { (StatusCode::SEE_OTHER, [(header::LOCATION, "/done")]) }),
            )
            .route(
                "/done",
                get(|method: Method| async move { method.to_string() }),
            ),
    )
    .await;

    let fetcher = OriginFetcher::new(settings()).unwrap();
    let response = fetcher
        .fetch(
            url(origin, "/submit"),
            FetchOptions {
                method: Method::POST,
                headers: Default::default(),
                body: Some("a=1".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.url.path(), "/done");
    assert_eq!(response.body.into_text(), "GET");
}

#[tokio::test]
async fn bodies_are_text_or_bytes_by_content_type() {
    let origin = spawn_origin(
        Router::new()
            .route("/page", get(|| async { axum::response::Html("<p>hi</p>") }))
            .route(
                "/logo.png",
                get(|| async { ([(header::CONTENT_TYPE, "image/png")], vec![0x89u8, b'P', b'N', b'G']).into_response() }),
            ),
    )
    .await;

    let fetcher = OriginFetcher::new(settings()).unwrap();
    let page = fetcher.fetch(url(origin, "/page"), FetchOptions::get()).await.unwrap();
    assert!(matches!(page.body, UpstreamBody::Text(ref text) if text == "<p>hi</p>"));
    assert!(page.headers.get(header::CONTENT_LENGTH).is_none());

    let logo = fetcher.fetch(url(origin, "/logo.png"), FetchOptions::get()).await.unwrap();
    assert!(matches!(logo.body, UpstreamBody::Bytes(_)));
    assert_eq!(logo.body.as_bytes(), [0x89, b'P', b'N', b'G']);
}

#[tokio::test]
async fn repeated_request_is_suppressed_by_the_loop_guard() {
    let origin = spawn_origin(Router::new().route("/", get(|| async { "ok" }))).await;
    let fetcher = OriginFetcher::new(FetchSettings {
        loop_guard: Duration::from_secs(30),
        ..settings()
    })
    .unwrap();

    fetcher.fetch(url(origin, "/"), FetchOptions::get()).await.unwrap();
    let err = fetcher
        .fetch(url(origin, "/"), FetchOptions::get())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::RateLimited { .. }), "{err:?}");
    assert_eq!(fetcher.loop_guard().len(), 1);
}
