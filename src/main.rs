use training_backend::config::Config;
use training_backend::state::spawn_sweeper;
use training_backend::{build_state, routes::build_router};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = Config::from_env();
    let addr = config.bind_addr()?;
    let state = build_state(config)?;
    let sweeper = spawn_sweeper(state.clone());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("training backend listening on {}", addr);
    axum::serve(listener, app).await?;
    sweeper.abort();
    Ok(())
}
