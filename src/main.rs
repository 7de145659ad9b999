mod api;
mod app;
mod auth;
mod autoreply;
mod config;
mod error;
mod evolution;
mod outbound;
mod realtime;
mod store;
mod types;
mod upload;
mod util;
mod webhook;

#[tokio::main]
async fn main() {
    if let Err(err) = app::run().await {
        tracing::error!(error = %err, "evo talk hub stopped");
        eprintln!("evo talk hub stopped: {err}");
        std::process::exit(1);
    }
}
