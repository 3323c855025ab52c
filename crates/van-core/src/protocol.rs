//! Site synchronization protocol wire shapes
//!
//! Every message is a JSON object carrying `version` and `op`. Decoding is
//! strict: the version gate runs first, then the operation tag is matched
//! against the closed set of operations, then the operation's fields are
//! parsed. Nothing is defaulted past a failed check.
//!
//! Responses always carry `statusCode` and `statusDescription`. Success
//! responses (`statusCode == 200`) add operation-specific fields; failure
//! responses carry nothing else.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::hashing::ObjectHashes;
use crate::invitation::{InvitationId, MemberSiteId};
use crate::topology::OutgoingLink;

/// The only protocol version this implementation speaks
pub const PROTOCOL_VERSION: u64 = 1;

/// Status code carried by every success response
pub const STATUS_OK: u16 = 200;

/// Status code for messages that fail decoding
pub const STATUS_BAD_REQUEST: u16 = 400;

/// Errors raised while decoding protocol traffic
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unsupported protocol version {found} (expected {expected})")]
    VersionMismatch { expected: u64, found: u64 },

    #[error("unknown operation '{0}'")]
    UnknownOp(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    /// The peer answered with a failure response
    #[error("request rejected with status {status_code}: {description}")]
    Rejected { status_code: u16, description: String },
}

impl ProtocolError {
    /// Status code to answer with when this error ends a message
    pub fn status_code(&self) -> u16 {
        match self {
            ProtocolError::Rejected { status_code, .. } => *status_code,
            _ => STATUS_BAD_REQUEST,
        }
    }
}

/// Closed set of operation tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Heartbeat,
    Get,
    Claim,
}

impl OpCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpCode::Heartbeat => "HB",
            OpCode::Get => "GET",
            OpCode::Claim => "CLAIM",
        }
    }
}

impl FromStr for OpCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HB" => Ok(OpCode::Heartbeat),
            "GET" => Ok(OpCode::Get),
            "CLAIM" => Ok(OpCode::Claim),
            other => Err(ProtocolError::UnknownOp(other.to_string())),
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Anti-entropy probe from a site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub site: MemberSiteId,

    /// Object name to content hash, as the site currently holds them
    #[serde(default)]
    pub hashset: ObjectHashes,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Content-addressed fetch of one named object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Get {
    pub site: MemberSiteId,
    pub objectname: String,
}

/// Identity bootstrap against an invitation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claim: InvitationId,

    /// Requested site name
    pub name: String,
}

/// A decoded site message
#[derive(Debug, Clone, PartialEq)]
pub enum SiteMessage {
    Heartbeat(Heartbeat),
    Get(Get),
    Claim(Claim),
}

impl SiteMessage {
    pub fn op(&self) -> OpCode {
        match self {
            SiteMessage::Heartbeat(_) => OpCode::Heartbeat,
            SiteMessage::Get(_) => OpCode::Get,
            SiteMessage::Claim(_) => OpCode::Claim,
        }
    }

    /// Decode raw bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Self::decode(&value)
    }

    /// Decode a JSON envelope
    pub fn decode(value: &Value) -> Result<Self, ProtocolError> {
        let envelope = value
            .as_object()
            .ok_or_else(|| ProtocolError::Malformed("message is not an object".into()))?;

        let version = envelope
            .get("version")
            .ok_or_else(|| ProtocolError::Malformed("missing version".into()))?
            .as_u64()
            .ok_or_else(|| ProtocolError::Malformed("version must be an unsigned integer".into()))?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                found: version,
            });
        }

        let op: OpCode = envelope
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::Malformed("missing op".into()))?
            .parse()?;

        match op {
            OpCode::Heartbeat => fields(value).map(SiteMessage::Heartbeat),
            OpCode::Get => fields(value).map(SiteMessage::Get),
            OpCode::Claim => fields(value).map(SiteMessage::Claim),
        }
    }

    /// Encode with the current version and the operation tag
    pub fn encode(&self) -> Value {
        let mut value = match self {
            SiteMessage::Heartbeat(m) => serde_json::json!(m),
            SiteMessage::Get(m) => serde_json::json!(m),
            SiteMessage::Claim(m) => serde_json::json!(m),
        };
        if let Some(obj) = value.as_object_mut() {
            obj.insert("version".into(), PROTOCOL_VERSION.into());
            obj.insert("op".into(), self.op().as_str().into());
        }
        value
    }
}

fn fields<T: DeserializeOwned>(value: &Value) -> Result<T, ProtocolError> {
    T::deserialize(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

// =============================================================================
// Responses
// =============================================================================

/// Acknowledgement of a heartbeat
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatAck {
    /// The controller's authoritative hash-set for the site
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashset: Option<ObjectHashes>,
}

/// A fetched configuration object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReply {
    pub object_name: String,
    pub hash: String,
    pub data: Value,
}

/// Credential handed to a site that claimed an invitation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteClient {
    /// Name of the secret the credential was loaded from
    pub object_name: String,

    /// Base64-encoded key material
    pub key_material: String,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Result of a successful claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReply {
    /// Identity assigned to the new site
    pub site: MemberSiteId,
    pub outgoing_links: Vec<OutgoingLink>,
    pub site_client: SiteClient,
}

/// Body of a failure response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub status_code: u16,
    pub status_description: String,
}

/// Any response the controller sends
#[derive(Debug, Clone, PartialEq)]
pub enum SiteResponse {
    Heartbeat(HeartbeatAck),
    Object(ObjectReply),
    Claim(ClaimReply),
    Failure(Failure),
}

impl SiteResponse {
    pub fn failure(status_code: u16, description: impl Into<String>) -> Self {
        SiteResponse::Failure(Failure {
            status_code,
            status_description: description.into(),
        })
    }

    pub fn status_code(&self) -> u16 {
        match self {
            SiteResponse::Failure(f) => f.status_code,
            _ => STATUS_OK,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code() == STATUS_OK
    }
}

impl From<ProtocolError> for SiteResponse {
    fn from(err: ProtocolError) -> Self {
        SiteResponse::failure(err.status_code(), err.to_string())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Success<'a, T> {
    status_code: u16,
    status_description: &'static str,
    #[serde(flatten)]
    payload: &'a T,
}

impl<'a, T> Success<'a, T> {
    fn new(payload: &'a T) -> Self {
        Self {
            status_code: STATUS_OK,
            status_description: "OK",
            payload,
        }
    }
}

impl Serialize for SiteResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SiteResponse::Heartbeat(p) => Success::new(p).serialize(serializer),
            SiteResponse::Object(p) => Success::new(p).serialize(serializer),
            SiteResponse::Claim(p) => Success::new(p).serialize(serializer),
            SiteResponse::Failure(f) => f.serialize(serializer),
        }
    }
}

/// Decode a response to a request that expects payload `T`
///
/// A non-200 response becomes `ProtocolError::Rejected`; callers never read
/// operation fields from a failure.
pub fn decode_reply<T: DeserializeOwned>(value: &Value) -> Result<T, ProtocolError> {
    let status = value
        .get("statusCode")
        .and_then(Value::as_u64)
        .ok_or_else(|| ProtocolError::Malformed("missing statusCode".into()))?;

    if status != STATUS_OK as u64 {
        let description = value
            .get("statusDescription")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(ProtocolError::Rejected {
            status_code: u16::try_from(status).unwrap_or(u16::MAX),
            description,
        });
    }

    fields(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_decode_heartbeat() {
        let site = Uuid::new_v4();
        let msg = SiteMessage::decode(&json!({
            "version": 1,
            "op": "HB",
            "site": site,
            "hashset": {"links": "abc"},
        }))
        .unwrap();

        match msg {
            SiteMessage::Heartbeat(hb) => {
                assert_eq!(hb.site, site);
                assert_eq!(hb.hashset.get("links").map(String::as_str), Some("abc"));
                assert!(hb.address.is_none());
            }
            other => panic!("expected heartbeat, got {:?}", other),
        }
    }

    #[test]
    fn test_version_checked_before_op() {
        let err = SiteMessage::decode(&json!({"version": 2, "op": "NOPE"})).unwrap_err();
        assert_eq!(err, ProtocolError::VersionMismatch { expected: 1, found: 2 });
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_missing_version_is_malformed() {
        let err = SiteMessage::decode(&json!({"op": "HB", "site": Uuid::new_v4()})).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));

        let err = SiteMessage::decode(&json!({"version": "1", "op": "HB"})).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_unknown_op_rejected() {
        let err = SiteMessage::decode(&json!({"version": 1, "op": "hb"})).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownOp("hb".into()));
    }

    #[test]
    fn test_claim_requires_fields() {
        let err = SiteMessage::decode(&json!({"version": 1, "op": "CLAIM", "claim": Uuid::new_v4()}))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));

        let err = SiteMessage::decode(&json!({"version": 1, "op": "CLAIM", "claim": "nope", "name": "x"}))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_encode_carries_version_and_op() {
        let msg = SiteMessage::Get(Get {
            site: Uuid::new_v4(),
            objectname: "links".into(),
        });
        let value = msg.encode();
        assert_eq!(value["version"], 1);
        assert_eq!(value["op"], "GET");
        assert_eq!(SiteMessage::decode(&value).unwrap(), msg);
    }

    #[test]
    fn test_from_slice_rejects_garbage() {
        assert!(matches!(
            SiteMessage::from_slice(b"{not json"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_success_response_shape() {
        let response = SiteResponse::Object(ObjectReply {
            object_name: "links".into(),
            hash: "00ff".into(),
            data: json!([]),
        });
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["statusCode"], 200);
        assert_eq!(value["statusDescription"], "OK");
        assert_eq!(value["objectName"], "links");
        assert_eq!(value["hash"], "00ff");

        let reply: ObjectReply = decode_reply(&value).unwrap();
        assert_eq!(reply.object_name, "links");
    }

    #[test]
    fn test_failure_response_carries_nothing_else() {
        let response = SiteResponse::failure(410, "invitation expired");
        let value = serde_json::to_value(&response).unwrap();

        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert_eq!(value["statusCode"], 410);
        assert_eq!(value["statusDescription"], "invitation expired");

        let err = decode_reply::<ClaimReply>(&value).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Rejected {
                status_code: 410,
                description: "invitation expired".into()
            }
        );
    }

    #[test]
    fn test_empty_heartbeat_ack() {
        let value = serde_json::to_value(SiteResponse::Heartbeat(HeartbeatAck::default())).unwrap();
        assert_eq!(value, json!({"statusCode": 200, "statusDescription": "OK"}));
    }
}
