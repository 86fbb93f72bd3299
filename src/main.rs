use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lm_dispatch::adapters::HttpAdapter;
use lm_dispatch::{Args, DispatchEngine, Prompt, RequestParameters};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.to_config();

    let raw = std::fs::read_to_string(&args.prompts).expect("failed to read prompts file");
    let prompts: Vec<Prompt> = raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(Prompt::from)
        .collect();
    let total = prompts.len();

    let mut adapter = HttpAdapter::new(&args.endpoint);
    if let Some(key) = &args.api_key {
        adapter = adapter.with_api_key(key);
    }

    let engine = DispatchEngine::new(&args.model, Arc::new(adapter), config)
        .expect("failed to initialize dispatch engine")
        .on_progress(|done, total| info!("progress: {done}/{total}"));

    let parameters = RequestParameters {
        temperature: args.temperature,
        max_tokens: args.max_tokens,
        ..Default::default()
    };

    info!(
        "dispatching {total} prompts to {} (model {})",
        args.endpoint, args.model
    );

    match engine.run(prompts, &parameters).await {
        Ok(responses) => {
            let succeeded = responses.iter().filter(|r| r.is_success()).count();
            for response in &responses {
                println!("{}", serde_json::to_string(response).expect("response serializes"));
            }
            info!("batch finished: {succeeded}/{total} succeeded");
        }
        Err(err) => {
            error!(%err, "batch aborted");
            std::process::exit(1);
        }
    }
}
