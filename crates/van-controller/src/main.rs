//! VAN Controller Binary
//!
//! Runs the certificate authority pipeline and the HTTP server.

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

use van_controller::onboarding::bootstrap_backbone;
use van_controller::{
    create_router, AppState, CertificateIssuer, ControllerConfig, ControllerSync, Fulfillment,
    LocalIssuer, MemorySecretStore, NetworkIntake, PipelineHandle, PipelineStats, Provisioning,
    Schedule, SecretStore, TopologyStore,
};

#[tokio::main]
async fn main() {
    let config = ControllerConfig::from_env().expect("Invalid controller configuration");

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    // Initialize storage
    let store = open_store(&config).await;
    let secrets: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
    let issuer: Arc<dyn CertificateIssuer> = Arc::new(LocalIssuer::new(secrets.clone()));

    let backbone = bootstrap_backbone(
        store.as_ref(),
        issuer.clone(),
        &config.backbone_name,
        config.policy.backbone_ca_lifetime,
        Utc::now(),
    )
    .await
    .expect("Failed to bootstrap backbone");

    info!(
        backbone = %backbone.id,
        name = %backbone.name,
        store = store.backend(),
        port = config.port,
        ca_lifetime = %config.policy.ca_lifetime,
        cert_lifetime = %config.policy.leaf_lifetime,
        "Starting VAN controller"
    );

    // Start the certificate pipeline
    let stats = Arc::new(PipelineStats::default());
    let pipeline = PipelineHandle::spawn(
        Arc::new(NetworkIntake::new(store.clone(), config.policy)),
        Arc::new(Fulfillment::new(store.clone(), issuer, config.policy)),
        Schedule::default(),
        stats.clone(),
    );

    // Create application state
    let state = Arc::new(AppState {
        store: store.clone(),
        sync: ControllerSync::new(store.clone(), secrets.clone()),
        provisioning: Provisioning::new(store, secrets),
        stats,
    });

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!(addr = %addr, "VAN controller listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    pipeline.shutdown().await;
    info!("VAN controller stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown requested");
}

#[cfg(feature = "postgres")]
async fn open_store(config: &ControllerConfig) -> Arc<dyn TopologyStore> {
    match &config.database_url {
        Some(url) => Arc::new(
            van_controller::storage::PostgresStore::new(url)
                .await
                .expect("Failed to open PostgreSQL store"),
        ),
        None => Arc::new(van_controller::MemoryStore::new()),
    }
}

#[cfg(not(feature = "postgres"))]
async fn open_store(config: &ControllerConfig) -> Arc<dyn TopologyStore> {
    if config.database_url.is_some() {
        tracing::warn!("VAN_DATABASE_URL is set but the postgres feature is disabled; using the in-memory store");
    }
    Arc::new(van_controller::MemoryStore::new())
}
