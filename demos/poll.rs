use std::time::Duration;

use serde::Deserialize;
use steady_http::{Client, PollConfig, RequestConfig, RequestError};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct JobStatus {
    status: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,steady_http=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let url = std::env::var("STEADY_HTTP_JOB_URL")?;

    let poll_config = PollConfig::new(RequestConfig::from_env()?, |job: &JobStatus| {
        job.status == "done"
    })
    .with_interval(Duration::from_secs(2))
    .with_timeout(Duration::from_secs(120));

    match Client::new().poll(&url, &poll_config).await {
        Ok(job) => println!("job finished after {:?}", job.response.elapsed),
        Err(RequestError::PollExhausted { cycles, last, .. }) => {
            eprintln!("job still running after {cycles} cycle(s), last body: {last:?}");
        }
        Err(err) => return Err(err.into()),
    }

    Ok(())
}
