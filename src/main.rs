mod api;
mod config;
mod engine;
mod error;
mod fetch;
mod link;
mod signals;
mod ui;

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::api::ApiClient;
use crate::config::Config;
use crate::engine::Engine;
use crate::signals::default_signals;
use crate::ui::ConsolePresenter;

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("repscore=info".parse().unwrap()),
        )
        .init();

    let config = Config::load("config.toml");

    let raw = match std::env::args().nth(1) {
        Some(raw) => raw,
        None => {
            eprintln!("usage: repscore <username | link with a user= parameter>");
            std::process::exit(2);
        }
    };
    let identity = match link::identity_from_link(&raw) {
        Some(identity) => identity,
        None if raw.contains('?') || raw.contains('#') => {
            eprintln!("No username found in link: {raw}");
            std::process::exit(2);
        }
        None => raw,
    };

    let client = match ApiClient::new(&config.api) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!("Failed to build API client: {e}");
            std::process::exit(1);
        }
    };
    let engine = Engine::new(
        default_signals(config.api.page_limit),
        client,
        config.api.max_pages,
    );
    let mut presenter = ConsolePresenter::new(config.ui.graph_width);

    println!("Reputation score for {identity}:");

    let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
    match rt.block_on(engine.evaluate(&identity, &mut presenter)) {
        Ok(snapshot) => {
            println!("\n  total: {}", ui::format_total(snapshot.total));
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
