//! User service: owns the user table and coordinates the event sagas.

use txweave::config::Config;
use txweave::server;
use txweave::utils::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let mut config = Config::load()?;
    config.tables.user = true;
    let state = server::build_state(config).await?;
    server::serve(state).await?;
    Ok(())
}
