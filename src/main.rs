use std::sync::Arc;

use duel_server::api;
use duel_server::config::Config;
use duel_server::duel::{DuelServer, InMemoryTermStore, RoomManager, TermSource};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    init_tracing(config.logging.json);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Duel server stopped");
        std::process::exit(1);
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(config: Config) -> duel_server::Result<()> {
    let term_source: Arc<dyn TermSource> = match &config.terms_file {
        Some(path) => Arc::new(InMemoryTermStore::from_json_file(path).await?),
        None => {
            tracing::warn!("TERMS_FILE not set, every duel will start with an empty round");
            Arc::new(InMemoryTermStore::new())
        }
    };

    let room_manager = RoomManager::new();
    let duel_server = Arc::new(DuelServer::with_room_manager(
        room_manager,
        term_source,
        config.duel.clone(),
    ));
    duel_server.clone().start_room_sweeper();

    let routes = api::duel_routes(duel_server, config.server.cors_origin.as_deref());

    let address = config.bind_address();
    tracing::info!(host = ?address.0, port = address.1, "Duel server listening");
    warp::serve(routes).run(address).await;
    Ok(())
}
