//! Site agent: claim, cache and reconcile
//!
//! The agent keeps a cache of named configuration objects. Each heartbeat
//! reports the cache's hash-set; when the controller answers with its
//! authoritative hash-set the agent GETs every stale object, verifies it
//! against its hash and drops objects the controller no longer lists.

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use van_core::hashing::{hash_set, retired_objects, stale_objects};
use van_core::protocol::{
    decode_reply, Claim, ClaimReply, Get, Heartbeat, HeartbeatAck, ObjectReply, SiteClient,
};
use van_core::{ConfigObject, InvitationId, MemberSiteId, ObjectHashes, OutgoingLink, SiteMessage};

use crate::error::{AgentError, Result};
use crate::transport::SyncTransport;

/// Local copy of a site's configuration objects
#[derive(Debug, Clone, Default)]
pub struct ObjectCache {
    objects: BTreeMap<String, ConfigObject>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hashes(&self) -> ObjectHashes {
        hash_set(self.objects.values())
    }

    pub fn get(&self, name: &str) -> Option<&ConfigObject> {
        self.objects.get(name)
    }

    pub fn insert(&mut self, object: ConfigObject) {
        self.objects.insert(object.name.clone(), object);
    }

    pub fn remove(&mut self, name: &str) -> Option<ConfigObject> {
        self.objects.remove(name)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// What one reconciliation changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Objects fetched because they were missing or stale
    pub fetched: Vec<String>,
    /// Objects dropped because the controller no longer lists them
    pub retired: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.fetched.is_empty() && self.retired.is_empty()
    }
}

/// The site side of the synchronization protocol
pub struct SiteAgent<T> {
    transport: T,
    site: Option<MemberSiteId>,
    address: Option<String>,
    credential: Option<SiteClient>,
    access_links: Vec<OutgoingLink>,
    cache: ObjectCache,
}

impl<T: SyncTransport> SiteAgent<T> {
    /// An agent with no identity; call `claim` before reconciling
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            site: None,
            address: None,
            credential: None,
            access_links: Vec::new(),
            cache: ObjectCache::new(),
        }
    }

    /// An agent for an already admitted site
    pub fn for_site(transport: T, site: MemberSiteId) -> Self {
        let mut agent = Self::new(transport);
        agent.site = Some(site);
        agent
    }

    /// Report `address` with each heartbeat
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn site(&self) -> Option<MemberSiteId> {
        self.site
    }

    pub fn credential(&self) -> Option<&SiteClient> {
        self.credential.as_ref()
    }

    pub fn access_links(&self) -> &[OutgoingLink] {
        &self.access_links
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    /// Claim an invitation and adopt the site identity it grants
    pub async fn claim(&mut self, invitation: InvitationId, name: &str) -> Result<MemberSiteId> {
        let message = SiteMessage::Claim(Claim {
            claim: invitation,
            name: name.to_string(),
        });
        let reply: ClaimReply = decode_reply(&self.transport.send(&message).await?)?;

        info!(
            site = %reply.site,
            invitation = %invitation,
            links = reply.outgoing_links.len(),
            "Claimed site identity"
        );
        self.site = Some(reply.site);
        self.credential = Some(reply.site_client);
        self.access_links = reply.outgoing_links;
        Ok(reply.site)
    }

    /// One heartbeat, followed by GETs for every stale object
    pub async fn reconcile(&mut self) -> Result<ReconcileReport> {
        let site = self.site.ok_or(AgentError::Unclaimed)?;
        let local = self.cache.hashes();

        let message = SiteMessage::Heartbeat(Heartbeat {
            site,
            hashset: local.clone(),
            address: self.address.clone(),
        });
        let ack: HeartbeatAck = decode_reply(&self.transport.send(&message).await?)?;
        let Some(authoritative) = ack.hashset else {
            debug!(site = %site, "Heartbeat acknowledged without hash-set");
            return Ok(ReconcileReport::default());
        };

        let mut report = ReconcileReport::default();
        for name in stale_objects(&local, &authoritative) {
            let object = self.fetch(site, &name).await?;
            self.cache.insert(object);
            report.fetched.push(name);
        }
        for name in retired_objects(&local, &authoritative) {
            self.cache.remove(&name);
            report.retired.push(name);
        }

        if !report.is_empty() {
            info!(
                site = %site,
                fetched = ?report.fetched,
                retired = ?report.retired,
                "Reconciled configuration"
            );
        }
        Ok(report)
    }

    async fn fetch(&self, site: MemberSiteId, name: &str) -> Result<ConfigObject> {
        let message = SiteMessage::Get(Get {
            site,
            objectname: name.to_string(),
        });
        let reply: ObjectReply = decode_reply(&self.transport.send(&message).await?)?;

        let object = ConfigObject {
            name: reply.object_name,
            hash: reply.hash,
            data: reply.data,
        };
        if object.name != name || !object.verify() {
            return Err(AgentError::Corrupt(name.to_string()));
        }
        Ok(object)
    }

    /// Reconcile every `interval` until `shutdown` flips to true
    ///
    /// Failed rounds are logged and retried on the next tick.
    pub async fn run(&mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile().await {
                        warn!(site = ?self.site, error = %e, "Reconciliation failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(site = ?self.site, "Site agent stopped");
    }
}
