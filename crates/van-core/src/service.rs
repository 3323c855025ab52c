//! Endpoints, offered/required services and service-link delivery semantics

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

use crate::invitation::MemberSiteId;
use crate::network::NetworkId;
use crate::types::{AddressScope, Distribution, StickyMechanism};

pub type EndpointId = Uuid;
pub type ServiceLinkId = Uuid;

// =============================================================================
// Endpoints
// =============================================================================

/// Where an endpoint is deployed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "value", rename_all = "camelCase")]
pub enum Placement {
    /// Every member site of this class
    SiteClass(String),
    /// One specific member site
    Site(MemberSiteId),
}

/// Variant-specific part of an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EndpointKind {
    Process { image: String, tag: String },
    Ingress,
    Egress,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Process { .. } => "process",
            EndpointKind::Ingress => "ingress",
            EndpointKind::Egress => "egress",
        }
    }
}

/// A unit of workload attached to a network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EndpointId,
    pub name: String,
    pub network: NetworkId,
    pub placement: Placement,
    #[serde(flatten)]
    pub kind: EndpointKind,
}

impl Endpoint {
    /// Whether this endpoint runs on a member site of `site_class`
    pub fn applies_to(&self, site: MemberSiteId, site_class: Option<&str>) -> bool {
        match &self.placement {
            Placement::Site(id) => *id == site,
            Placement::SiteClass(class) => site_class == Some(class.as_str()),
        }
    }
}

// =============================================================================
// Services
// =============================================================================

/// An image offering an abstract service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferedService {
    pub image: String,
    pub service: String,
    #[serde(default = "default_sticky")]
    pub sticky: StickyMechanism,
}

fn default_sticky() -> StickyMechanism {
    StickyMechanism::None
}

/// An image requiring an abstract service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredService {
    pub image: String,
    pub service: String,
}

/// Routing contract for one logical service inside a network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLink {
    pub id: ServiceLinkId,
    pub network: NetworkId,

    /// Abstract service name
    pub name: String,

    pub van_address: String,
    pub distribution: Distribution,
    pub scope: AddressScope,
}

/// A running instance that can receive traffic for a service
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub site: String,
    pub instance: String,
}

/// Why a service link cannot be exposed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExposureError {
    #[error("service '{0}' has forbidden distribution")]
    Forbidden(String),

    #[error("service '{0}' has no offering image")]
    NoOffering(String),

    #[error("service '{service}' offerings disagree on stickiness: {found:?}")]
    MixedStickiness { service: String, found: Vec<StickyMechanism> },

    #[error("service '{service}' uses {sticky} stickiness, which requires anycast")]
    StickinessRequiresAnycast { service: String, sticky: StickyMechanism },
}

/// How a validated service link is exposed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exposure {
    pub address: String,
    pub distribution: Distribution,
    pub scope: AddressScope,
    pub sticky: StickyMechanism,

    /// The address must terminate at one proxy with session affinity
    pub single_proxy: bool,
}

impl ServiceLink {
    /// Validate this link against the stickiness of its offering images
    pub fn exposure(&self, offerings: &[OfferedService]) -> Result<Exposure, ExposureError> {
        if self.distribution == Distribution::Forbidden {
            return Err(ExposureError::Forbidden(self.name.clone()));
        }

        let mechanisms: BTreeSet<&'static str> = offerings
            .iter()
            .filter(|o| o.service == self.name)
            .map(|o| o.sticky.as_str())
            .collect();

        let sticky = match mechanisms.len() {
            0 => return Err(ExposureError::NoOffering(self.name.clone())),
            1 => offerings
                .iter()
                .find(|o| o.service == self.name)
                .map(|o| o.sticky)
                .unwrap_or(StickyMechanism::None),
            _ => {
                return Err(ExposureError::MixedStickiness {
                    service: self.name.clone(),
                    found: mechanisms
                        .iter()
                        .filter_map(|m| m.parse().ok())
                        .collect(),
                })
            }
        };

        if sticky != StickyMechanism::None && self.distribution != Distribution::Anycast {
            return Err(ExposureError::StickinessRequiresAnycast {
                service: self.name.clone(),
                sticky,
            });
        }

        Ok(Exposure {
            address: self.van_address.clone(),
            distribution: self.distribution,
            scope: self.scope,
            sticky,
            single_proxy: sticky == StickyMechanism::Cookie,
        })
    }

    /// Addresses assigned for the given instances, per the link's scope
    pub fn addresses(&self, instances: &[ServiceInstance]) -> Vec<String> {
        let set: BTreeSet<String> = match self.scope {
            AddressScope::Van => BTreeSet::from([self.van_address.clone()]),
            AddressScope::Site => instances
                .iter()
                .map(|i| format!("{}/{}", self.van_address, i.site))
                .collect(),
            AddressScope::Instance => instances
                .iter()
                .map(|i| format!("{}/{}/{}", self.van_address, i.site, i.instance))
                .collect(),
        };
        set.into_iter().collect()
    }

    /// Instances that receive one payload
    ///
    /// Anycast picks exactly one instance (selected by `payload_key`),
    /// multicast returns all of them, forbidden returns none.
    pub fn delivery_set(&self, instances: &[ServiceInstance], payload_key: u64) -> Vec<ServiceInstance> {
        if instances.is_empty() {
            return Vec::new();
        }
        match self.distribution {
            Distribution::Forbidden => Vec::new(),
            Distribution::Multicast => {
                let mut all = instances.to_vec();
                all.sort();
                all.dedup();
                all
            }
            Distribution::Anycast => {
                let mut sorted = instances.to_vec();
                sorted.sort();
                sorted.dedup();
                let pick = (payload_key % sorted.len() as u64) as usize;
                vec![sorted.swap_remove(pick)]
            }
        }
    }
}

/// Exposures for every deliverable link in `links`
///
/// Links that fail validation (forbidden ones included) are left out and
/// reported through the returned rejections.
pub fn plan_exposures(
    links: &[ServiceLink],
    offerings: &[OfferedService],
) -> (Vec<(ServiceLinkId, Exposure)>, Vec<ExposureError>) {
    let mut exposed = Vec::new();
    let mut rejected = Vec::new();
    for link in links {
        match link.exposure(offerings) {
            Ok(e) => exposed.push((link.id, e)),
            Err(e) => rejected.push(e),
        }
    }
    (exposed, rejected)
}
