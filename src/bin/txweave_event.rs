//! Event service: owns the event table and coordinates membership sagas.

use txweave::config::Config;
use txweave::server;
use txweave::utils::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut config = Config::load()?;
    config.tables.event = true;
    let state = server::build_state(config).await?;
    server::serve(state).await?;
    Ok(())
}
