//! Network intake worker
//!
//! Turns one `new` network per pass into a `vanCA` certificate request and
//! advances the network to `cert_request_created`, in a single transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use van_core::{CertificateSubject, NetworkStatus, NewCertificateRequest};

use super::{PassOutcome, PipelineError, Worker};
use crate::config::CertificatePolicy;
use crate::storage::{finish, StoreTransaction, TopologyStore};

#[derive(Debug, Clone)]
pub struct NetworkIntake {
    store: Arc<dyn TopologyStore>,
    policy: CertificatePolicy,
}

impl NetworkIntake {
    pub fn new(store: Arc<dyn TopologyStore>, policy: CertificatePolicy) -> Self {
        Self { store, policy }
    }

    /// Run one intake pass as of `now`
    pub async fn pass(&self, now: DateTime<Utc>) -> Result<PassOutcome, PipelineError> {
        let mut tx = self.store.begin().await?;
        let result = self.intake(tx.as_mut(), now).await;
        finish(tx, result).await
    }

    async fn intake(
        &self,
        tx: &mut dyn StoreTransaction,
        now: DateTime<Utc>,
    ) -> Result<PassOutcome, PipelineError> {
        let Some(network) = tx.next_new_network().await? else {
            return Ok(PassOutcome::Idle);
        };

        let expiration = network.ca_expiration(self.policy.ca_lifetime);
        let request = NewCertificateRequest::new(CertificateSubject::Network(network.id), now)
            .not_before(network.start_time)
            .expiring(expiration);
        let request_id = tx.insert_certificate_request(&request).await?;
        tx.set_network_status(network.id, NetworkStatus::CertRequestCreated)
            .await?;

        info!(
            network = %network.id,
            name = %network.name,
            request = request_id,
            expiration = %expiration,
            "Requested network CA"
        );
        Ok(PassOutcome::Worked)
    }
}

#[async_trait]
impl Worker for NetworkIntake {
    fn name(&self) -> &'static str {
        "network-intake"
    }

    async fn run_once(&self) -> Result<PassOutcome, PipelineError> {
        self.pass(Utc::now()).await
    }
}
