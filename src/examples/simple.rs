//! Simple example of using reqwest-session-proxies.
//!
//! Usage: `cargo run --example simple -- proxies.txt`

use reqwest_middleware::ClientBuilder;
use reqwest_session_proxies::{CrawlRequest, RotationConfig, SessionProxyMiddleware, UserAgentMode};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let proxy_file = std::env::args().nth(1).unwrap_or_else(|| "proxies.txt".to_string());

    let config = RotationConfig::builder()
        .proxy_file(proxy_file)
        .retry_times_per_proxy(3)
        .retry_times_per_url(5)
        .user_agent_mode(UserAgentMode::Desktop)
        .allowed_statuses([200])
        .request_timeout(Duration::from_secs(10))
        // rate limit for each proxy, lower performance but avoid banned
        .max_requests_per_second(3.0)
        .build();

    let middleware = SessionProxyMiddleware::from_config(&config)?;

    let client = ClientBuilder::new(reqwest::Client::new())
        .with(middleware)
        .build();

    println!("Starting session...");
    let response = client
        .get("http://httpbin.org/cookies/set/session/1")
        .send()
        .await?;
    println!("Status: {}", response.status());

    // Continue the same session: same proxy, same cookies, same user-agent.
    let first = response
        .extensions()
        .get::<CrawlRequest>()
        .cloned()
        .ok_or("response carries no binding")?;
    let url = reqwest::Url::parse("http://httpbin.org/cookies")?;
    let next = first.follow_up(reqwest::Method::GET, url.clone());

    let response = client.get(url).with_extension(next).send().await?;
    println!("Response: {}", response.text().await?);

    Ok(())
}
