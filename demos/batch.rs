use std::time::Duration;

use steady_http::{
    AbortStrategy, BatchOptions, Client, DownloadContent, RateLimiter, RequestConfig,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,steady_http=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let base = std::env::var("STEADY_HTTP_URL")
        .unwrap_or_else(|_| "https://jsonplaceholder.typicode.com".to_owned());
    let targets: Vec<String> = (1..=10).map(|id| format!("{base}/posts/{id}")).collect();

    let config = RequestConfig::from_env()?
        .with_download_content(DownloadContent::Json)
        .with_rate_limiter(RateLimiter::new("jsonplaceholder", 4, Duration::from_secs(1))?);

    let client = Client::new();
    let results = client.request_many(targets.clone(), &config, None).await?;
    for (target, result) in targets.iter().zip(results) {
        match result {
            Ok(response) => println!("{target}: {} after {:?}", response.status, response.elapsed),
            Err(err) => eprintln!("{target}: {err}"),
        }
    }

    let options = BatchOptions::fail_fast(AbortStrategy::Cancel).with_max_concurrency(3);
    match client
        .request_many_with(targets, &config, None, &options)
        .await
    {
        Ok(results) => println!("fail-fast batch finished with {} result(s)", results.len()),
        Err(err) => eprintln!("fail-fast batch aborted: {err}"),
    }

    Ok(())
}
