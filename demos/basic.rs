use std::time::Duration;

use serde::Deserialize;
use steady_http::{Client, Content, RequestConfig, Retryer};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct Todo {
    id: u64,
    title: String,
    completed: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,steady_http=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let url = std::env::var("STEADY_HTTP_URL")
        .unwrap_or_else(|_| "https://jsonplaceholder.typicode.com/todos/1".to_owned());

    let retryer = Retryer::new(4, Duration::from_millis(200), Duration::from_secs(5))?
        .with_retryable_status_codes([429, 500, 502, 503, 504])
        .with_content_retry(|content: &Content| {
            content
                .as_json()
                .is_some_and(|body| body.get("error").is_some())
        });
    let config = RequestConfig::from_env()?.with_retryer(retryer);

    let client = Client::new();
    let todo = client.request_structured::<Todo>(&url, &config, None).await?;

    println!(
        "todo #{} '{}' (completed: {}) after {} attempt(s) in {:?}",
        todo.data.id,
        todo.data.title,
        todo.data.completed,
        todo.response.attempts,
        todo.response.elapsed
    );

    Ok(())
}
