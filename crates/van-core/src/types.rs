//! Closed enumerations shared by the store, the pipeline and the protocol
//!
//! Every enumeration here is a closed set. Parsing an unrecognized value is an
//! error (`VanError::UnknownVariant`); nothing falls back to a default.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::VanError;

/// Granularity at which a service address is assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressScope {
    /// One address for the whole network
    Van,
    /// One address per site
    Site,
    /// One address per instance
    Instance,
}

impl AddressScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressScope::Van => "van",
            AddressScope::Site => "site",
            AddressScope::Instance => "instance",
        }
    }
}

impl FromStr for AddressScope {
    type Err = VanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "van" => Ok(AddressScope::Van),
            "site" => Ok(AddressScope::Site),
            "instance" => Ok(AddressScope::Instance),
            _ => Err(VanError::unknown("AddressScopeType", s)),
        }
    }
}

/// Session-affinity mechanism for an offered service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StickyMechanism {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "sourceAddress")]
    SourceAddress,
    #[serde(rename = "cookie")]
    Cookie,
}

impl StickyMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            StickyMechanism::None => "none",
            StickyMechanism::SourceAddress => "sourceAddress",
            StickyMechanism::Cookie => "cookie",
        }
    }
}

impl FromStr for StickyMechanism {
    type Err = VanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(StickyMechanism::None),
            "sourceAddress" => Ok(StickyMechanism::SourceAddress),
            "cookie" => Ok(StickyMechanism::Cookie),
            _ => Err(VanError::unknown("StickyMechanismType", s)),
        }
    }
}

/// Delivery semantics applied to traffic on a service address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    /// Exactly one instance receives each payload
    Anycast,
    /// Every instance receives every payload
    Multicast,
    /// No delivery
    Forbidden,
}

impl Distribution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distribution::Anycast => "anycast",
            Distribution::Multicast => "multicast",
            Distribution::Forbidden => "forbidden",
        }
    }
}

impl FromStr for Distribution {
    type Err = VanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anycast" => Ok(Distribution::Anycast),
            "multicast" => Ok(Distribution::Multicast),
            "forbidden" => Ok(Distribution::Forbidden),
            _ => Err(VanError::unknown("DistributionType", s)),
        }
    }
}

/// Kind of certificate a request asks for
///
/// The kind selects both the subject column that must be populated and the
/// certificate authority that signs the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CertificateRequestType {
    /// Inter-router certificate for a backbone site, signed by the backbone CA
    #[serde(rename = "interiorRouter")]
    InteriorRouter,
    /// Self-signed certificate authority for an application network
    #[serde(rename = "vanCA")]
    VanCa,
    /// Claim certificate for an invitation, signed by the network CA
    #[serde(rename = "memberClaim")]
    MemberClaim,
    /// Identity certificate for a member site, signed by the network CA
    #[serde(rename = "vanSite")]
    VanSite,
}

impl CertificateRequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateRequestType::InteriorRouter => "interiorRouter",
            CertificateRequestType::VanCa => "vanCA",
            CertificateRequestType::MemberClaim => "memberClaim",
            CertificateRequestType::VanSite => "vanSite",
        }
    }

    /// Whether the certificate produced for this kind is itself a CA
    pub fn issues_ca(&self) -> bool {
        matches!(self, CertificateRequestType::VanCa)
    }
}

impl FromStr for CertificateRequestType {
    type Err = VanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interiorRouter" => Ok(CertificateRequestType::InteriorRouter),
            "vanCA" => Ok(CertificateRequestType::VanCa),
            "memberClaim" => Ok(CertificateRequestType::MemberClaim),
            "vanSite" => Ok(CertificateRequestType::VanSite),
            _ => Err(VanError::unknown("CertificateRequestType", s)),
        }
    }
}

/// Operational status of an application network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    /// Created, not yet seen by network intake
    New,
    /// A `vanCA` request exists for the network
    CertRequestCreated,
    /// The network CA is issued and attached
    Ready,
}

impl NetworkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkStatus::New => "new",
            NetworkStatus::CertRequestCreated => "cert_request_created",
            NetworkStatus::Ready => "ready",
        }
    }
}

impl FromStr for NetworkStatus {
    type Err = VanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(NetworkStatus::New),
            "cert_request_created" => Ok(NetworkStatus::CertRequestCreated),
            "ready" => Ok(NetworkStatus::Ready),
            _ => Err(VanError::unknown("NetworkStatus", s)),
        }
    }
}

macro_rules! display_as_str {
    ($($t:ty),*) => {
        $(impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(
    AddressScope,
    StickyMechanism,
    Distribution,
    CertificateRequestType,
    NetworkStatus
);
