//! VAN Site Agent Binary

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;

use van_agent::{AgentConfig, HttpTransport, SiteAgent, SiteIdentity};

#[tokio::main]
async fn main() {
    let config = AgentConfig::from_env().expect("Invalid agent configuration");

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let transport = HttpTransport::new(&config.controller_url);
    let mut agent = match &config.identity {
        SiteIdentity::Site(site) => SiteAgent::for_site(transport, *site),
        SiteIdentity::Claim { invitation, name } => {
            let mut agent = SiteAgent::new(transport);
            agent
                .claim(*invitation, name)
                .await
                .expect("Failed to claim invitation");
            agent
        }
    };
    if let Some(address) = &config.address {
        agent = agent.with_address(address.clone());
    }

    info!(
        site = ?agent.site(),
        controller = %config.controller_url,
        interval_secs = config.heartbeat_interval.as_secs(),
        "Starting site agent"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    agent.run(config.heartbeat_interval, shutdown_rx).await;
}
