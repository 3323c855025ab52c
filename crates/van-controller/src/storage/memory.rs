//! In-memory storage backend
//!
//! Default storage implementation. A transaction takes the store lock for
//! its whole lifetime and works on a private copy of the state, which
//! replaces the shared state on commit. Transactions are therefore fully
//! serialized. Data is lost on restart.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use van_core::certificate::{CertificateId, RequestId};
use van_core::invitation::{InvitationId, MemberSiteId};
use van_core::network::NetworkId;
use van_core::service::{Endpoint, EndpointId, OfferedService, ServiceLink, ServiceLinkId};
use van_core::topology::{BackboneId, InteriorSiteId, LinkId};
use van_core::{
    ApplicationNetwork, Backbone, CertificateRequest, CertificateSubject, InterRouterLink,
    InteriorSite, MemberInvitation, MemberSite, NetworkStatus, NewCertificateRequest,
    TlsCertificate,
};

use super::{StorageError, StoreTransaction, TopologyStore};

#[derive(Debug, Clone, Default)]
struct TopologyState {
    networks: HashMap<NetworkId, ApplicationNetwork>,
    backbones: HashMap<BackboneId, Backbone>,
    interior_sites: HashMap<InteriorSiteId, InteriorSite>,
    links: HashMap<LinkId, InterRouterLink>,
    invitations: HashMap<InvitationId, MemberInvitation>,
    member_sites: HashMap<MemberSiteId, MemberSite>,
    endpoints: HashMap<EndpointId, Endpoint>,
    service_links: HashMap<ServiceLinkId, ServiceLink>,
    offered: HashMap<NetworkId, Vec<OfferedService>>,
    certificates: HashMap<CertificateId, TlsCertificate>,
    requests: BTreeMap<RequestId, CertificateRequest>,
    next_request_id: RequestId,
}

impl TopologyState {
    fn subject_exists(&self, subject: &CertificateSubject) -> bool {
        match subject {
            CertificateSubject::InteriorRouter(id) => self.interior_sites.contains_key(id),
            CertificateSubject::Network(id) => self.networks.contains_key(id),
            CertificateSubject::Invitation(id) => self.invitations.contains_key(id),
            CertificateSubject::MemberSite(id) => self.member_sites.contains_key(id),
        }
    }
}

/// In-memory topology store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<TopologyState>>,
    faults: Arc<Mutex<HashSet<&'static str>>>,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call to `operation` fail with a database error
    ///
    /// `operation` is a `StoreTransaction` method name. Used to exercise
    /// rollback paths.
    pub async fn fail_next(&self, operation: &'static str) {
        self.faults.lock().await.insert(operation);
    }
}

#[async_trait]
impl TopologyStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StorageError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            faults: self.faults.clone(),
        }))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Transaction over a private copy of the state
struct MemoryTransaction {
    guard: OwnedMutexGuard<TopologyState>,
    working: TopologyState,
    faults: Arc<Mutex<HashSet<&'static str>>>,
}

impl MemoryTransaction {
    async fn check(&self, operation: &'static str) -> Result<(), StorageError> {
        if self.faults.lock().await.remove(operation) {
            return Err(StorageError::Database(format!("injected fault in {}", operation)));
        }
        Ok(())
    }
}

fn insert_unique<K, V>(map: &mut HashMap<K, V>, key: K, value: V, kind: &str) -> Result<(), StorageError>
where
    K: std::hash::Hash + Eq + std::fmt::Display,
{
    if map.contains_key(&key) {
        return Err(StorageError::AlreadyExists(format!("{} {}", kind, key)));
    }
    map.insert(key, value);
    Ok(())
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    // =========================================================================
    // Application networks
    // =========================================================================

    async fn insert_network(&mut self, network: &ApplicationNetwork) -> Result<(), StorageError> {
        self.check("insert_network").await?;
        insert_unique(&mut self.working.networks, network.id, network.clone(), "network")
    }

    async fn get_network(&mut self, id: NetworkId) -> Result<Option<ApplicationNetwork>, StorageError> {
        Ok(self.working.networks.get(&id).cloned())
    }

    async fn next_new_network(&mut self) -> Result<Option<ApplicationNetwork>, StorageError> {
        self.check("next_new_network").await?;
        Ok(self
            .working
            .networks
            .values()
            .filter(|n| n.status == NetworkStatus::New)
            .min_by_key(|n| (n.start_time, n.id))
            .cloned())
    }

    async fn set_network_status(&mut self, id: NetworkId, status: NetworkStatus) -> Result<(), StorageError> {
        self.check("set_network_status").await?;
        let network = self
            .working
            .networks
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("network", id))?;
        network.status = status;
        Ok(())
    }

    // =========================================================================
    // Backbone
    // =========================================================================

    async fn insert_backbone(&mut self, backbone: &Backbone) -> Result<(), StorageError> {
        self.check("insert_backbone").await?;
        if self.working.backbones.values().any(|b| b.name == backbone.name) {
            return Err(StorageError::AlreadyExists(format!("backbone {}", backbone.name)));
        }
        insert_unique(&mut self.working.backbones, backbone.id, backbone.clone(), "backbone")
    }

    async fn get_backbone(&mut self, id: BackboneId) -> Result<Option<Backbone>, StorageError> {
        Ok(self.working.backbones.get(&id).cloned())
    }

    async fn find_backbone(&mut self, name: &str) -> Result<Option<Backbone>, StorageError> {
        Ok(self.working.backbones.values().find(|b| b.name == name).cloned())
    }

    async fn list_backbones(&mut self) -> Result<Vec<Backbone>, StorageError> {
        Ok(self.working.backbones.values().cloned().collect())
    }

    async fn insert_interior_site(&mut self, site: &InteriorSite) -> Result<(), StorageError> {
        self.check("insert_interior_site").await?;
        if !self.working.backbones.contains_key(&site.backbone) {
            return Err(StorageError::foreign_key("backbone", site.backbone));
        }
        insert_unique(&mut self.working.interior_sites, site.id, site.clone(), "interior site")
    }

    async fn get_interior_site(&mut self, id: InteriorSiteId) -> Result<Option<InteriorSite>, StorageError> {
        Ok(self.working.interior_sites.get(&id).cloned())
    }

    async fn list_interior_sites(&mut self) -> Result<Vec<InteriorSite>, StorageError> {
        Ok(self.working.interior_sites.values().cloned().collect())
    }

    async fn insert_link(&mut self, link: &InterRouterLink) -> Result<(), StorageError> {
        self.check("insert_link").await?;
        for site in [link.listening_site, link.connecting_site] {
            if !self.working.interior_sites.contains_key(&site) {
                return Err(StorageError::foreign_key("interior site", site));
            }
        }
        insert_unique(&mut self.working.links, link.id, link.clone(), "link")
    }

    async fn links_from(&mut self, site: InteriorSiteId) -> Result<Vec<InterRouterLink>, StorageError> {
        Ok(self
            .working
            .links
            .values()
            .filter(|l| l.connecting_site == site)
            .cloned()
            .collect())
    }

    // =========================================================================
    // Invitations and member sites
    // =========================================================================

    async fn insert_invitation(&mut self, invitation: &MemberInvitation) -> Result<(), StorageError> {
        self.check("insert_invitation").await?;
        if !self.working.networks.contains_key(&invitation.network) {
            return Err(StorageError::foreign_key("network", invitation.network));
        }
        for site in invitation.access_points() {
            if !self.working.interior_sites.contains_key(&site) {
                return Err(StorageError::foreign_key("interior site", site));
            }
        }
        insert_unique(&mut self.working.invitations, invitation.id, invitation.clone(), "invitation")
    }

    async fn get_invitation(&mut self, id: InvitationId) -> Result<Option<MemberInvitation>, StorageError> {
        Ok(self.working.invitations.get(&id).cloned())
    }

    async fn update_invitation_count(&mut self, id: InvitationId, count: u32) -> Result<(), StorageError> {
        self.check("update_invitation_count").await?;
        let invitation = self
            .working
            .invitations
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("invitation", id))?;
        invitation.instance_count = count;
        Ok(())
    }

    async fn insert_member_site(&mut self, site: &MemberSite) -> Result<(), StorageError> {
        self.check("insert_member_site").await?;
        if !self.working.networks.contains_key(&site.network) {
            return Err(StorageError::foreign_key("network", site.network));
        }
        if !self.working.invitations.contains_key(&site.invitation) {
            return Err(StorageError::foreign_key("invitation", site.invitation));
        }
        insert_unique(&mut self.working.member_sites, site.id, site.clone(), "member site")
    }

    async fn get_member_site(&mut self, id: MemberSiteId) -> Result<Option<MemberSite>, StorageError> {
        Ok(self.working.member_sites.get(&id).cloned())
    }

    async fn record_heartbeat(
        &mut self,
        id: MemberSiteId,
        at: DateTime<Utc>,
        address: Option<&str>,
    ) -> Result<bool, StorageError> {
        self.check("record_heartbeat").await?;
        match self.working.member_sites.get_mut(&id) {
            Some(site) => {
                site.last_heartbeat = Some(at);
                if let Some(address) = address {
                    site.address = Some(address.to_string());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // =========================================================================
    // Services and endpoints
    // =========================================================================

    async fn insert_endpoint(&mut self, endpoint: &Endpoint) -> Result<(), StorageError> {
        self.check("insert_endpoint").await?;
        if !self.working.networks.contains_key(&endpoint.network) {
            return Err(StorageError::foreign_key("network", endpoint.network));
        }
        insert_unique(&mut self.working.endpoints, endpoint.id, endpoint.clone(), "endpoint")
    }

    async fn endpoints_for_site(&mut self, site: &MemberSite) -> Result<Vec<Endpoint>, StorageError> {
        let mut endpoints: Vec<Endpoint> = self
            .working
            .endpoints
            .values()
            .filter(|e| e.network == site.network)
            .filter(|e| e.applies_to(site.id, site.site_class.as_deref()))
            .cloned()
            .collect();
        endpoints.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(endpoints)
    }

    async fn insert_service_link(&mut self, link: &ServiceLink) -> Result<(), StorageError> {
        self.check("insert_service_link").await?;
        if !self.working.networks.contains_key(&link.network) {
            return Err(StorageError::foreign_key("network", link.network));
        }
        insert_unique(&mut self.working.service_links, link.id, link.clone(), "service link")
    }

    async fn service_links(&mut self, network: NetworkId) -> Result<Vec<ServiceLink>, StorageError> {
        let mut links: Vec<ServiceLink> = self
            .working
            .service_links
            .values()
            .filter(|l| l.network == network)
            .cloned()
            .collect();
        links.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(links)
    }

    async fn insert_offered_service(
        &mut self,
        network: NetworkId,
        offered: &OfferedService,
    ) -> Result<(), StorageError> {
        self.check("insert_offered_service").await?;
        if !self.working.networks.contains_key(&network) {
            return Err(StorageError::foreign_key("network", network));
        }
        self.working.offered.entry(network).or_default().push(offered.clone());
        Ok(())
    }

    async fn offered_services(&mut self, network: NetworkId) -> Result<Vec<OfferedService>, StorageError> {
        Ok(self.working.offered.get(&network).cloned().unwrap_or_default())
    }

    // =========================================================================
    // Certificates
    // =========================================================================

    async fn insert_certificate(&mut self, certificate: &TlsCertificate) -> Result<(), StorageError> {
        self.check("insert_certificate").await?;
        if let Some(issuer) = certificate.signed_by {
            if !self.working.certificates.contains_key(&issuer) {
                return Err(StorageError::foreign_key("certificate", issuer));
            }
        }
        insert_unique(
            &mut self.working.certificates,
            certificate.id,
            certificate.clone(),
            "certificate",
        )
    }

    async fn get_certificate(&mut self, id: CertificateId) -> Result<Option<TlsCertificate>, StorageError> {
        Ok(self.working.certificates.get(&id).cloned())
    }

    async fn attach_certificate(
        &mut self,
        subject: CertificateSubject,
        certificate: CertificateId,
    ) -> Result<(), StorageError> {
        self.check("attach_certificate").await?;
        if !self.working.certificates.contains_key(&certificate) {
            return Err(StorageError::foreign_key("certificate", certificate));
        }
        let missing = || StorageError::not_found(subject.kind().as_str(), subject.id());
        let state = &mut self.working;
        match subject {
            CertificateSubject::InteriorRouter(id) => {
                state.interior_sites.get_mut(&id).ok_or_else(missing)?.certificate = Some(certificate);
            }
            CertificateSubject::Network(id) => {
                state.networks.get_mut(&id).ok_or_else(missing)?.certificate = Some(certificate);
            }
            CertificateSubject::Invitation(id) => {
                state.invitations.get_mut(&id).ok_or_else(missing)?.claim_certificate = Some(certificate);
            }
            CertificateSubject::MemberSite(id) => {
                state.member_sites.get_mut(&id).ok_or_else(missing)?.certificate = Some(certificate);
            }
        }
        Ok(())
    }

    async fn set_backbone_certificate(
        &mut self,
        backbone: BackboneId,
        certificate: CertificateId,
    ) -> Result<(), StorageError> {
        self.check("set_backbone_certificate").await?;
        if !self.working.certificates.contains_key(&certificate) {
            return Err(StorageError::foreign_key("certificate", certificate));
        }
        let row = self
            .working
            .backbones
            .get_mut(&backbone)
            .ok_or_else(|| StorageError::not_found("backbone", backbone))?;
        row.certificate = Some(certificate);
        Ok(())
    }

    // =========================================================================
    // Certificate requests
    // =========================================================================

    async fn insert_certificate_request(
        &mut self,
        request: &NewCertificateRequest,
    ) -> Result<RequestId, StorageError> {
        self.check("insert_certificate_request").await?;
        if !self.working.subject_exists(&request.subject) {
            return Err(StorageError::foreign_key(
                request.subject.kind().as_str(),
                request.subject.id(),
            ));
        }
        self.working.next_request_id += 1;
        let id = self.working.next_request_id;
        self.working.requests.insert(
            id,
            CertificateRequest {
                id,
                subject: request.subject,
                created_time: request.created_time,
                request_time: request.request_time,
                expire_time: request.expire_time,
                processing: false,
                processing_since: None,
            },
        );
        debug!(request = id, subject = %request.subject, "Inserted certificate request");
        Ok(id)
    }

    async fn get_certificate_request(&mut self, id: RequestId) -> Result<Option<CertificateRequest>, StorageError> {
        Ok(self.working.requests.get(&id).cloned())
    }

    async fn list_certificate_requests(&mut self) -> Result<Vec<CertificateRequest>, StorageError> {
        Ok(self.working.requests.values().cloned().collect())
    }

    async fn claim_next_request(
        &mut self,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<CertificateRequest>, StorageError> {
        self.check("claim_next_request").await?;
        let next = self
            .working
            .requests
            .values()
            .filter(|r| r.is_eligible(now, lease))
            .min_by_key(|r| (r.created_time, r.id))
            .map(|r| r.id);

        Ok(next.and_then(|id| {
            self.working.requests.get_mut(&id).map(|request| {
                request.processing = true;
                request.processing_since = Some(now);
                request.clone()
            })
        }))
    }

    async fn release_request(&mut self, id: RequestId) -> Result<(), StorageError> {
        self.check("release_request").await?;
        if let Some(request) = self.working.requests.get_mut(&id) {
            request.processing = false;
            request.processing_since = None;
        }
        Ok(())
    }

    async fn delete_certificate_request(&mut self, id: RequestId) -> Result<(), StorageError> {
        self.check("delete_certificate_request").await?;
        self.working
            .requests
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found("certificate request", id))
    }

    // =========================================================================
    // Completion
    // =========================================================================

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        self.check("commit").await?;
        let MemoryTransaction { mut guard, working, .. } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;
    use van_core::NewNetwork;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
    }

    async fn seed_network(store: &MemoryStore) -> NetworkId {
        let network = NewNetwork::new("acme", "alice", at(0)).into_network(Uuid::new_v4());
        let mut tx = store.begin().await.unwrap();
        tx.insert_network(&network).await.unwrap();
        tx.commit().await.unwrap();
        network.id
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = MemoryStore::new();
        let id = seed_network(&store).await;

        let mut tx = store.begin().await.unwrap();
        tx.set_network_status(id, NetworkStatus::Ready).await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.get_network(id).await.unwrap().unwrap().status, NetworkStatus::New);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let store = MemoryStore::new();
        let id = seed_network(&store).await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.set_network_status(id, NetworkStatus::Ready).await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.get_network(id).await.unwrap().unwrap().status, NetworkStatus::New);
    }

    #[tokio::test]
    async fn test_request_subject_must_exist() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let request = NewCertificateRequest::new(CertificateSubject::Network(Uuid::new_v4()), at(0));

        assert!(matches!(
            tx.insert_certificate_request(&request).await,
            Err(StorageError::ForeignKey(_))
        ));
    }

    #[tokio::test]
    async fn test_claim_marks_processing() {
        let store = MemoryStore::new();
        let id = seed_network(&store).await;

        let mut tx = store.begin().await.unwrap();
        let request = NewCertificateRequest::new(CertificateSubject::Network(id), at(0));
        let rid = tx.insert_certificate_request(&request).await.unwrap();

        let lease = Duration::minutes(5);
        let claimed = tx.claim_next_request(at(1), lease).await.unwrap().unwrap();
        assert_eq!(claimed.id, rid);
        assert!(claimed.processing);
        assert!(tx.claim_next_request(at(1), lease).await.unwrap().is_none());

        tx.release_request(rid).await.unwrap();
        assert!(tx.claim_next_request(at(1), lease).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_injected_fault_fires_once() {
        let store = MemoryStore::new();
        let id = seed_network(&store).await;
        store.fail_next("set_network_status").await;

        let mut tx = store.begin().await.unwrap();
        assert!(tx.set_network_status(id, NetworkStatus::Ready).await.is_err());
        assert!(tx.set_network_status(id, NetworkStatus::Ready).await.is_ok());
    }
}
