pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod models;
pub mod order;
pub mod presence;
pub mod reducer;
pub mod session;
pub mod shell;
pub mod store;
pub mod subscriber;
pub mod transport;

use cli::Args;
use config::{ model_display_name, SessionConfig };
use log::info;
use session::{ SessionController, SessionEvent };
use std::error::Error;
use std::sync::Arc;
use tokio::sync::mpsc;
use transport::WsTransport;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = SessionConfig::from(&args);

    info!("--- Session Configuration ---");
    info!("Session ID: {}", config.session_id);
    info!("Subject ID: {}", config.subject_id);
    info!("Display Name: {}", config.display_name.as_deref().unwrap_or("(none)"));
    info!("Transport Endpoint: {}", config.ws_endpoint);
    info!("Store Type: {}", config.store_type);
    info!("Store Host: {}", config.store_host);
    info!("Store Prefix: {}", config.store_prefix);
    info!("Model: {}", model_display_name(&config.model));
    info!("Credential Set: {}", !config.credential.is_empty());
    info!("Typing Heartbeat: {:?}", config.heartbeat_interval);
    info!("Seal On Final: {}", config.seal_on_final);
    info!("Persist Local Messages: {}", config.persist_local);
    info!("-----------------------------");

    let store = store::initialize_store(&config)?;
    let (events_tx, events_rx) = mpsc::unbounded_channel::<SessionEvent>();

    let transport = WsTransport::open(&config.ws_endpoint, events_tx.clone())?;
    info!("Connecting to: {}", transport.endpoint());

    let mut controller = SessionController::new(config, Arc::new(transport), store);
    controller.attach(events_tx.clone()).await?;

    let renderer = tokio::spawn(shell::render(controller.subscribe_view()));
    tokio::spawn(shell::read_input(events_tx));
    println!("{}", shell::HELP);

    controller.run(events_rx).await;
    let _ = renderer.await;

    Ok(())
}
