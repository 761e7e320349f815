use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_session_proxies::{
    BindError, CrawlRequest, ProxyAddress, ProxyPool, RotationConfig, RotationController,
    SessionProxyMiddleware, UserAgentCorpus, UserAgentMode,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};

const TARGET: &str = "http://crawl.test/page";

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Builds the status line and body of a reply from the request head.
type Responder = Arc<dyn Fn(&str) -> (String, String) + Send + Sync>;

/// A proxy that answers each request with whatever `respond` makes of its head.
async fn spawn_proxy(respond: Responder) -> (ProxyAddress, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let respond = Arc::clone(&respond);
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&request).into_owned();
                let (status_line, body) = respond(&head);
                let response = format!(
                    "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (ProxyAddress::new("127.0.0.1", port), hits)
}

/// A proxy that answers every request with the same canned response.
async fn fake_proxy(status_line: &'static str, body: &'static str) -> (ProxyAddress, Arc<AtomicUsize>) {
    spawn_proxy(Arc::new(move |_: &str| (status_line.to_string(), body.to_string()))).await
}

fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

/// An address nothing listens on.
fn closed_port() -> ProxyAddress {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    ProxyAddress::new("127.0.0.1", port)
}

fn client(addresses: Vec<ProxyAddress>, config: RotationConfig) -> (ClientWithMiddleware, Arc<RotationController>) {
    let pool = ProxyPool::new(addresses, &UserAgentCorpus::builtin(), UserAgentMode::All).unwrap();
    let controller = Arc::new(RotationController::new(Arc::new(pool), &config));
    let middleware = SessionProxyMiddleware::new(Arc::clone(&controller), &config);
    let client = ClientBuilder::new(reqwest::Client::new()).with(middleware).build();
    (client, controller)
}

fn config() -> RotationConfig {
    RotationConfig::builder()
        .retry_times_per_proxy(1)
        .retry_times_per_url(10)
        .request_timeout(Duration::from_secs(5))
        .build()
}

#[tokio::test]
async fn good_proxy_serves_and_becomes_proven() {
    init_logger();
    let (good, hits) = fake_proxy("200 OK", "hello").await;
    let (client, controller) = client(vec![good], config());

    let response = assert_ok!(client.get(TARGET).send().await);
    assert_eq!(response.status(), 200);

    let binding = response.extensions().get::<CrawlRequest>().cloned().unwrap();
    assert_eq!(binding.meta.session, Some(0));
    let proxy = controller.pool().get(0).unwrap();
    assert_eq!(binding.meta.routing_slot, Some(proxy.routing_slot()));
    assert!(proxy.routing_slot().starts_with("127_0_0_1-"));
    assert!(binding.headers.contains_key(http::header::USER_AGENT));

    assert_eq!(response.text().await.unwrap(), "hello");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(controller.pool().get(0).unwrap().is_proven());
}

#[tokio::test]
async fn banned_proxy_is_rotated_out() {
    init_logger();
    let (bad, bad_hits) = fake_proxy("403 Forbidden", "go away").await;
    let (good, _) = fake_proxy("200 OK", "hello").await;
    let (client, controller) = client(vec![bad, good], config());

    let response = assert_ok!(client.get(TARGET).send().await);
    assert_eq!(response.text().await.unwrap(), "hello");

    let bad = controller.pool().get(0).unwrap();
    assert_eq!(bad.banned, bad_hits.load(Ordering::SeqCst) > 0);
    assert!(controller.pool().get(1).unwrap().is_proven());
}

#[tokio::test]
async fn only_banned_proxies_exhaust_the_pool() {
    init_logger();
    let (first, _) = fake_proxy("403 Forbidden", "").await;
    let (second, _) = fake_proxy("200 OK", "").await;
    let (client, controller) = client(vec![first, second], config());

    let err = assert_err!(client.get(TARGET).send().await);
    match err {
        reqwest_middleware::Error::Middleware(e) => {
            assert!(matches!(e.downcast_ref::<BindError>(), Some(BindError::Exhausted(_))));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(controller.pool().live_count(), 0);
    assert!(controller.pool().live().is_empty());
}

#[tokio::test]
async fn dead_proxy_is_retired_and_request_retried() {
    init_logger();
    let (good, _) = fake_proxy("200 OK", "hello").await;
    let (client, controller) = client(vec![closed_port(), good], config());

    let response = assert_ok!(client.get(TARGET).send().await);
    assert_eq!(response.text().await.unwrap(), "hello");

    let dead = controller.pool().get(0).unwrap();
    assert_eq!(dead.dead, dead.failed_count == 1);
    assert!(controller.pool().get(1).unwrap().checked);
}

#[tokio::test]
async fn transport_failures_end_in_abandonment() {
    init_logger();
    let config = RotationConfig::builder()
        .retry_times_per_proxy(100)
        .retry_times_per_url(2)
        .request_timeout(Duration::from_secs(5))
        .build();
    let (client, controller) = client(vec![closed_port()], config);

    let err = assert_err!(client.get(TARGET).send().await);
    match err {
        reqwest_middleware::Error::Middleware(e) => match e.downcast_ref::<BindError>() {
            Some(BindError::Abandoned(abandoned)) => assert_eq!(abandoned.retry_times, 3),
            other => panic!("unexpected bind error: {:?}", other),
        },
        other => panic!("unexpected error: {}", other),
    }

    let proxy = controller.pool().get(0).unwrap();
    assert_eq!(proxy.failed_count, 2);
    assert!(proxy.is_live());
}

#[tokio::test]
async fn follow_up_stays_in_session() {
    init_logger();
    let (one, _) = fake_proxy("200 OK", "one").await;
    let (two, _) = fake_proxy("200 OK", "two").await;
    let (client, _controller) = client(vec![one, two], config());

    let first = assert_ok!(client.get(TARGET).send().await);
    let binding = first.extensions().get::<CrawlRequest>().cloned().unwrap();
    let body = first.text().await.unwrap();

    for _ in 0..5 {
        let url = reqwest::Url::parse("http://crawl.test/next").unwrap();
        let next = binding.follow_up(reqwest::Method::GET, url.clone());
        let response = assert_ok!(client.get(url).with_extension(next).send().await);

        let again = response.extensions().get::<CrawlRequest>().cloned().unwrap();
        assert_eq!(again.meta.session, binding.meta.session);
        assert_eq!(
            again.headers.get(http::header::USER_AGENT),
            binding.headers.get(http::header::USER_AGENT)
        );
        assert_eq!(response.text().await.unwrap(), body);
    }
}

#[tokio::test]
async fn caller_user_agent_survives_crawl_extension() {
    init_logger();
    let echo: Responder = Arc::new(|head: &str| {
        ("200 OK".to_string(), header(head, "user-agent").unwrap_or("").to_string())
    });
    let (echo, _) = spawn_proxy(echo).await;
    let (client, _controller) = client(vec![echo], config());
    let url = reqwest::Url::parse(TARGET).unwrap();

    let plain = assert_ok!(client.get(url.clone()).header("User-Agent", "my-crawler").send().await);
    assert_eq!(plain.text().await.unwrap(), "my-crawler");

    let response = assert_ok!(
        client
            .get(url.clone())
            .header("User-Agent", "my-crawler")
            .with_extension(CrawlRequest::get(url))
            .send()
            .await
    );
    let binding = response.extensions().get::<CrawlRequest>().cloned().unwrap();
    assert_eq!(binding.headers[http::header::USER_AGENT], "my-crawler");
    assert_eq!(response.text().await.unwrap(), "my-crawler");
}

#[tokio::test]
async fn banned_follow_up_restarts_from_first_hop_without_body() {
    init_logger();
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let record = Arc::clone(&seen);
    let respond: Responder = Arc::new(move |head: &str| {
        record.lock().unwrap().push(head.to_string());
        if head.contains("/form") {
            ("403 Forbidden".to_string(), "blocked".to_string())
        } else {
            ("200 OK".to_string(), "ok".to_string())
        }
    });
    let (one, _) = spawn_proxy(Arc::clone(&respond)).await;
    let (two, _) = spawn_proxy(respond).await;
    let (client, controller) = client(vec![one, two], config());

    let first = assert_ok!(client.get(TARGET).send().await);
    let binding = first.extensions().get::<CrawlRequest>().cloned().unwrap();

    let form = reqwest::Url::parse("http://crawl.test/form").unwrap();
    let next = binding.follow_up(reqwest::Method::POST, form.clone());
    let response = assert_ok!(
        client
            .post(form)
            .body("field=value")
            .with_extension(next)
            .send()
            .await
    );
    assert_eq!(response.text().await.unwrap(), "ok");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen[1].starts_with("POST http://crawl.test/form"));
    assert!(seen[2].starts_with("GET http://crawl.test/page"));
    assert!(header(&seen[2], "content-length").map_or(true, |len| len == "0"));
    assert!(!seen[2].contains("field=value"));
    assert_eq!(controller.pool().live_count(), 1);
}

#[tokio::test]
async fn requests_sharing_a_slot_are_throttled() {
    init_logger();
    let config = RotationConfig::builder()
        .retry_times_per_proxy(1)
        .max_requests_per_second(1.0)
        .request_timeout(Duration::from_secs(5))
        .build();
    let (good, hits) = fake_proxy("200 OK", "hello").await;
    let (client, _controller) = client(vec![good], config);

    let started = Instant::now();
    for _ in 0..2 {
        let response = assert_ok!(client.get(TARGET).send().await);
        assert_eq!(response.text().await.unwrap(), "hello");
    }

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() >= Duration::from_millis(900));
}
