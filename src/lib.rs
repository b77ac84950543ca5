pub mod catalog;
pub mod config;
pub mod error;
pub mod exam;
pub mod forms;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod runner;
pub mod selection;
pub mod state;
pub mod summary;
pub mod ws_protocol;

pub fn build_state(config: config::Config) -> anyhow::Result<state::AppState> {
    let catalog = catalog::BankCatalog::load(config.banks_dir.as_deref())?;
    Ok(state::AppState::new(catalog, config))
}
