//! # VAN Core
//!
//! Domain model and wire primitives for the virtual application network
//! control plane.
//!
//! ## Key Concepts
//!
//! - **Application network**: a tenant overlay spanning many sites, rooted in
//!   its own certificate authority
//! - **Backbone**: the mesh of interior routers member sites attach to
//! - **Invitation**: a claim token that converts into a member-site identity
//! - **Certificate request**: a unit of work for the CA pipeline
//! - **Sync protocol**: HB / GET / CLAIM messages exchanged with sites
//!
//! ## Invariants kept in application logic
//!
//! 1. A certificate request names exactly the subject its kind selects
//! 2. No certificate outlives its issuer, and every issuer is a CA
//! 3. Links are only advertised between sites on the same or federated backbones
//! 4. An invitation admits claims only before its deadline and under its limit
//! 5. A `forbidden` service link never yields deliverable traffic

pub mod certificate;
pub mod crypto;
pub mod error;
pub mod hashing;
pub mod invitation;
pub mod network;
pub mod protocol;
pub mod service;
pub mod topology;
pub mod types;

pub use certificate::{
    CertificateId, CertificateRequest, CertificateSubject, NewCertificateRequest, RequestId,
    TlsCertificate,
};
pub use crypto::{CertificateBody, KeyPair, PublicKey, SignedCertificate};
pub use error::{Result, VanError};
pub use hashing::{ConfigObject, ObjectHashes};
pub use invitation::{AdmissionError, InvitationId, MemberInvitation, MemberSite, MemberSiteId, NewInvitation};
pub use network::{ApplicationNetwork, Lifetime, NetworkId, NewNetwork};
pub use protocol::{ProtocolError, SiteMessage, SiteResponse, PROTOCOL_VERSION};
pub use service::{Endpoint, EndpointKind, OfferedService, Placement, ServiceLink};
pub use topology::{Backbone, BackboneId, InterRouterLink, InteriorSite, InteriorSiteId, OutgoingLink};
pub use types::{AddressScope, CertificateRequestType, Distribution, NetworkStatus, StickyMechanism};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
