//! Backbone topology: interior sites and the inter-router links between them
//!
//! The backbone is a weighted directed graph. Integrity rules the store
//! cannot express are checked by `BackboneGraph` before a link is advertised:
//! both endpoints must exist and sit on the same backbone, or on backbones
//! that federate with each other.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::certificate::CertificateId;
use crate::error::{Result, VanError};

pub type BackboneId = Uuid;
pub type InteriorSiteId = Uuid;
pub type LinkId = Uuid;

/// Default cost of an inter-router link
pub const DEFAULT_LINK_COST: u32 = 1;

/// A mesh of always-on interior routers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backbone {
    pub id: BackboneId,
    pub name: String,

    /// Interior CA that signs `interiorRouter` certificates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateId>,

    /// Backbones whose sites may link with ours
    #[serde(default)]
    pub federated_with: Vec<BackboneId>,
}

/// A backbone router site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteriorSite {
    pub id: InteriorSiteId,
    pub name: String,
    pub backbone: BackboneId,

    /// Inter-router certificate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateId>,

    /// Host reachable by peer routers and member sites
    pub host: String,

    /// Listener for inter-router links
    pub inter_router_port: u16,

    /// Listener for member-site links
    pub member_port: u16,
}

/// Input for creating an interior site
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInteriorSite {
    pub name: String,
    pub host: String,
    #[serde(default = "default_inter_router_port")]
    pub inter_router_port: u16,
    #[serde(default = "default_member_port")]
    pub member_port: u16,
}

fn default_inter_router_port() -> u16 {
    55671
}

fn default_member_port() -> u16 {
    45671
}

/// A directed, weighted edge: `connecting_site` dials `listening_site`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterRouterLink {
    pub id: LinkId,
    pub listening_site: InteriorSiteId,
    pub connecting_site: InteriorSiteId,
    pub cost: u32,
}

/// A link a site should open towards a backbone listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingLink {
    pub site: InteriorSiteId,
    pub host: String,
    pub port: u16,
    pub cost: u32,
}

impl OutgoingLink {
    /// Inter-router link towards `target`
    pub fn inter_router(target: &InteriorSite, cost: u32) -> Self {
        Self {
            site: target.id,
            host: target.host.clone(),
            port: target.inter_router_port,
            cost,
        }
    }

    /// Member-site link towards the access point `target`
    pub fn member_access(target: &InteriorSite) -> Self {
        Self {
            site: target.id,
            host: target.host.clone(),
            port: target.member_port,
            cost: DEFAULT_LINK_COST,
        }
    }
}

/// Read-only view of the backbone used to validate links
#[derive(Debug, Default)]
pub struct BackboneGraph {
    backbones: HashMap<BackboneId, Backbone>,
    sites: HashMap<InteriorSiteId, InteriorSite>,
}

impl BackboneGraph {
    pub fn new(
        backbones: impl IntoIterator<Item = Backbone>,
        sites: impl IntoIterator<Item = InteriorSite>,
    ) -> Self {
        Self {
            backbones: backbones.into_iter().map(|b| (b.id, b)).collect(),
            sites: sites.into_iter().map(|s| (s.id, s)).collect(),
        }
    }

    pub fn site(&self, id: InteriorSiteId) -> Option<&InteriorSite> {
        self.sites.get(&id)
    }

    /// Two backbones may carry links between their sites
    pub fn federatable(&self, a: BackboneId, b: BackboneId) -> bool {
        if a == b {
            return true;
        }
        let lists = |x: BackboneId, y: BackboneId| {
            self.backbones
                .get(&x)
                .map_or(false, |bb| bb.federated_with.contains(&y))
        };
        lists(a, b) || lists(b, a)
    }

    /// Check that `link` may be advertised
    pub fn check_link(&self, link: &InterRouterLink) -> Result<()> {
        if link.listening_site == link.connecting_site {
            return Err(VanError::Topology(format!(
                "link {} connects site {} to itself",
                link.id, link.listening_site
            )));
        }
        let listening = self.site(link.listening_site).ok_or_else(|| {
            VanError::Topology(format!("listening site {} does not exist", link.listening_site))
        })?;
        let connecting = self.site(link.connecting_site).ok_or_else(|| {
            VanError::Topology(format!("connecting site {} does not exist", link.connecting_site))
        })?;
        if !self.federatable(listening.backbone, connecting.backbone) {
            return Err(VanError::Topology(format!(
                "backbones {} and {} do not federate",
                connecting.backbone, listening.backbone
            )));
        }
        Ok(())
    }

    /// Outgoing links of `site` that pass `check_link`
    ///
    /// Links that fail the check are skipped with a warning rather than
    /// advertised.
    pub fn advertised_links<'a>(
        &self,
        site: InteriorSiteId,
        links: impl IntoIterator<Item = &'a InterRouterLink>,
    ) -> Vec<OutgoingLink> {
        let mut out: Vec<OutgoingLink> = links
            .into_iter()
            .filter(|l| l.connecting_site == site)
            .filter_map(|l| match self.check_link(l) {
                Ok(()) => self
                    .site(l.listening_site)
                    .map(|target| OutgoingLink::inter_router(target, l.cost)),
                Err(e) => {
                    tracing::warn!(link = %l.id, error = %e, "Not advertising link");
                    None
                }
            })
            .collect();
        out.sort_by(|a, b| a.cost.cmp(&b.cost).then(a.host.cmp(&b.host)));
        out
    }
}
