//! Shared fixture for controller integration tests

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use std::sync::Arc;

use van_controller::onboarding::{
    add_interior_site, bootstrap_backbone, create_invitation, create_network,
};
use van_controller::pipeline::PassOutcome;
use van_controller::{
    CertificateIssuer, CertificatePolicy, ControllerSync, Fulfillment, LocalIssuer,
    MemorySecretStore, MemoryStore, NetworkIntake, Provisioning, SecretStore, TopologyStore,
};
use van_core::topology::NewInteriorSite;
use van_core::{
    ApplicationNetwork, Backbone, InteriorSite, MemberInvitation, NewInvitation, NewNetwork,
};

/// A controller wired over the in-memory stores, with one bootstrapped
/// backbone and one access site whose router certificate is issued
pub struct Fixture {
    pub store: MemoryStore,
    pub shared: Arc<dyn TopologyStore>,
    pub secrets: Arc<dyn SecretStore>,
    /// Concrete handle on `secrets`, for counting
    pub vault: Arc<MemorySecretStore>,
    pub issuer: Arc<dyn CertificateIssuer>,
    pub policy: CertificatePolicy,
    pub intake: NetworkIntake,
    pub fulfillment: Arc<Fulfillment>,
    pub backbone: Backbone,
    pub access: InteriorSite,
}

impl Fixture {
    pub async fn new(now: DateTime<Utc>) -> Self {
        let store = MemoryStore::new();
        let shared: Arc<dyn TopologyStore> = Arc::new(store.clone());
        let vault = Arc::new(MemorySecretStore::new());
        let secrets: Arc<dyn SecretStore> = vault.clone();
        let issuer: Arc<dyn CertificateIssuer> = Arc::new(LocalIssuer::new(secrets.clone()));
        let policy = CertificatePolicy::default();

        let backbone = bootstrap_backbone(
            shared.as_ref(),
            issuer.clone(),
            "default",
            policy.backbone_ca_lifetime,
            now,
        )
        .await
        .expect("bootstrap backbone");

        let access = add_interior_site(
            shared.as_ref(),
            backbone.id,
            NewInteriorSite {
                name: "east".into(),
                host: "east.example.net".into(),
                inter_router_port: 55671,
                member_port: 45671,
            },
            now,
        )
        .await
        .expect("add access site");

        let fixture = Self {
            intake: NetworkIntake::new(shared.clone(), policy),
            fulfillment: Arc::new(Fulfillment::new(shared.clone(), issuer.clone(), policy)),
            store,
            shared,
            secrets,
            vault,
            issuer,
            policy,
            backbone,
            access,
        };
        fixture.drain(now).await;
        fixture
    }

    pub fn sync(&self) -> ControllerSync {
        ControllerSync::new(self.shared.clone(), self.secrets.clone())
    }

    pub fn provisioning(&self) -> Provisioning {
        Provisioning::new(self.shared.clone(), self.secrets.clone())
    }

    /// Run both workers until neither has work left at `now`
    pub async fn drain(&self, now: DateTime<Utc>) {
        self.drain_intake(now).await;
        while self.fulfillment.pass(now).await.expect("fulfillment pass") == PassOutcome::Worked {}
    }

    /// Run network intake until no `new` network is left
    pub async fn drain_intake(&self, now: DateTime<Utc>) {
        while self.intake.pass(now).await.expect("intake pass") == PassOutcome::Worked {}
    }

    /// A network whose CA is issued
    pub async fn ready_network(&self, name: &str, now: DateTime<Utc>) -> ApplicationNetwork {
        let network = create_network(self.shared.as_ref(), NewNetwork::new(name, "alice", now))
            .await
            .expect("create network");
        self.drain(now).await;
        self.network(network.id).await
    }

    pub async fn network(&self, id: uuid::Uuid) -> ApplicationNetwork {
        let mut tx = self.shared.begin().await.expect("begin");
        tx.get_network(id).await.expect("get network").expect("network exists")
    }

    /// An invitation on `network`; its claim certificate is issued when
    /// `issue` is set
    pub async fn invitation(
        &self,
        network: &ApplicationNetwork,
        instance_limit: Option<u32>,
        join_deadline: Option<DateTime<Utc>>,
        issue: bool,
        now: DateTime<Utc>,
    ) -> MemberInvitation {
        let invitation = create_invitation(
            self.shared.as_ref(),
            network.id,
            NewInvitation {
                name: "edge".into(),
                site_class: Some("edge".into()),
                join_deadline,
                instance_limit,
                primary_access: self.access.id,
                secondary_access: None,
            },
            now,
        )
        .await
        .expect("create invitation");
        if issue {
            self.drain(now).await;
        }
        self.stored_invitation(invitation.id).await
    }

    pub async fn stored_invitation(&self, id: uuid::Uuid) -> MemberInvitation {
        let mut tx = self.shared.begin().await.expect("begin");
        tx.get_invitation(id).await.expect("get invitation").expect("invitation exists")
    }
}
