//! Application networks and the network CA expiration policy

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::certificate::CertificateId;
use crate::error::VanError;
use crate::types::NetworkStatus;

/// Application network identifier
pub type NetworkId = Uuid;

/// A tenant-owned virtual application network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationNetwork {
    pub id: NetworkId,

    pub name: String,

    /// Owning user
    pub owner: String,

    /// Identifier handed to sites and manifests
    pub van_id: String,

    /// The network's certificate authority, once issued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateId>,

    /// Start of the validity window
    pub start_time: DateTime<Utc>,

    /// End of the validity window (open-ended when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    /// Grace period applied after `end_time`
    #[serde(with = "duration_secs")]
    pub delete_delay: Duration,

    pub status: NetworkStatus,
}

impl ApplicationNetwork {
    /// Expiration for this network's forthcoming CA certificate
    ///
    /// A bounded network keeps its CA until `end_time + delete_delay`; an
    /// open-ended network gets `start_time + default_lifetime`. Both saturate
    /// at the latest representable instant.
    pub fn ca_expiration(&self, default_lifetime: Lifetime) -> DateTime<Utc> {
        match self.end_time {
            Some(end) => end
                .checked_add_signed(self.delete_delay)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            None => default_lifetime.after(self.start_time),
        }
    }

    /// Whether the network's CA has been issued and attached
    pub fn is_ready(&self) -> bool {
        self.status == NetworkStatus::Ready && self.certificate.is_some()
    }
}

/// Input for creating a network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNetwork {
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub van_id: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, with = "duration_secs")]
    pub delete_delay: Duration,
}

impl NewNetwork {
    pub fn new(name: impl Into<String>, owner: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            van_id: None,
            start_time,
            end_time: None,
            delete_delay: Duration::zero(),
        }
    }

    pub fn with_end_time(mut self, end: DateTime<Utc>, delete_delay: Duration) -> Self {
        self.end_time = Some(end);
        self.delete_delay = delete_delay;
        self
    }

    /// Check the validity window
    ///
    /// The end time may not precede the start time, the delete delay may
    /// not be negative, and `end_time + delete_delay` must be representable.
    pub fn validate(&self) -> Result<(), VanError> {
        if self.delete_delay < Duration::zero() {
            return Err(VanError::InvalidNetwork(format!(
                "delete delay {}s is negative",
                self.delete_delay.num_seconds()
            )));
        }
        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(VanError::InvalidNetwork(
                    "end time precedes start time".into(),
                ));
            }
            if end.checked_add_signed(self.delete_delay).is_none() {
                return Err(VanError::InvalidNetwork(format!(
                    "delete delay {}s runs past the representable range",
                    self.delete_delay.num_seconds()
                )));
            }
        }
        Ok(())
    }

    /// Materialize the network row with status `new`
    pub fn into_network(self, id: NetworkId) -> ApplicationNetwork {
        let van_id = self.van_id.unwrap_or_else(|| id.simple().to_string());
        ApplicationNetwork {
            id,
            name: self.name,
            owner: self.owner,
            van_id,
            certificate: None,
            start_time: self.start_time,
            end_time: self.end_time,
            delete_delay: self.delete_delay,
            status: NetworkStatus::New,
        }
    }
}

/// A certificate lifetime
///
/// Calendar lifetimes (months, years) follow the calendar, so one year from
/// 2024-01-01 is 2025-01-01 regardless of leap days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    Months(u32),
    Fixed(Duration),
}

impl Lifetime {
    /// `None` when the month count overflows
    pub fn checked_years(years: u32) -> Option<Self> {
        years.checked_mul(12).map(Lifetime::Months)
    }

    pub fn years(years: u32) -> Self {
        Lifetime::Months(years.saturating_mul(12))
    }

    pub fn days(days: i64) -> Self {
        Lifetime::Fixed(Duration::days(days))
    }

    /// The instant `self` after `start`
    pub fn after(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Lifetime::Months(months) => start
                .checked_add_months(Months::new(*months))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            Lifetime::Fixed(duration) => start
                .checked_add_signed(*duration)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

impl FromStr for Lifetime {
    type Err = VanError;

    /// Accepts `<n>y`, `<n>mo`, `<n>d` and `<n>h`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| VanError::unknown("Lifetime", s))?;
        let (digits, unit) = s.split_at(split);
        let n: u32 = digits.parse().map_err(|_| VanError::unknown("Lifetime", s))?;

        match unit {
            "y" => Lifetime::checked_years(n).ok_or_else(|| VanError::unknown("Lifetime", s)),
            "mo" => Ok(Lifetime::Months(n)),
            "d" => Ok(Lifetime::days(n as i64)),
            "h" => Ok(Lifetime::Fixed(Duration::hours(n as i64))),
            _ => Err(VanError::unknown("Lifetime", s)),
        }
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifetime::Months(m) if m % 12 == 0 => write!(f, "{}y", m / 12),
            Lifetime::Months(m) => write!(f, "{}mo", m),
            Lifetime::Fixed(d) if d.num_seconds() % 86_400 == 0 => write!(f, "{}d", d.num_days()),
            Lifetime::Fixed(d) => write!(f, "{}h", d.num_hours()),
        }
    }
}

/// Serde helper: a `chrono::Duration` as whole seconds
pub mod duration_secs {
    use chrono::Duration;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(d)?;
        Duration::try_seconds(secs)
            .ok_or_else(|| D::Error::custom(format!("duration of {} seconds is out of range", secs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_open_ended_network_uses_default_lifetime() {
        let network = NewNetwork::new("acme", "alice", at(2024, 1, 1)).into_network(Uuid::new_v4());

        let expiration = network.ca_expiration(Lifetime::years(1));
        assert_eq!(expiration, at(2025, 1, 1));

        // 2024 is a leap year, so a fixed 365 days stops one day short
        let fixed = network.ca_expiration(Lifetime::days(365));
        assert_eq!(fixed, at(2024, 12, 31));
    }

    #[test]
    fn test_bounded_network_adds_delete_delay() {
        let network = NewNetwork::new("acme", "alice", at(2024, 1, 1))
            .with_end_time(at(2024, 6, 1), Duration::days(30))
            .into_network(Uuid::new_v4());

        assert_eq!(network.ca_expiration(Lifetime::years(1)), at(2024, 7, 1));
    }

    #[test]
    fn test_new_network_defaults() {
        let id = Uuid::new_v4();
        let network = NewNetwork::new("acme", "alice", at(2024, 1, 1)).into_network(id);

        assert_eq!(network.status, NetworkStatus::New);
        assert_eq!(network.van_id, id.simple().to_string());
        assert!(network.certificate.is_none());
        assert!(!network.is_ready());
    }

    #[test]
    fn test_lifetime_parsing() {
        assert_eq!("1y".parse::<Lifetime>().unwrap(), Lifetime::Months(12));
        assert_eq!("18mo".parse::<Lifetime>().unwrap(), Lifetime::Months(18));
        assert_eq!("90d".parse::<Lifetime>().unwrap(), Lifetime::days(90));
        assert_eq!("6h".parse::<Lifetime>().unwrap(), Lifetime::Fixed(Duration::hours(6)));
        assert!("90".parse::<Lifetime>().is_err());
        assert!("d".parse::<Lifetime>().is_err());
        assert!("3w".parse::<Lifetime>().is_err());
        assert_eq!(Lifetime::years(1).to_string(), "1y");
        assert_eq!(Lifetime::days(90).to_string(), "90d");
    }

    #[test]
    fn test_lifetime_years_overflow_is_rejected() {
        assert!("400000000y".parse::<Lifetime>().is_err());
        assert_eq!(Lifetime::checked_years(400_000_000), None);
        assert_eq!("357913941y".parse::<Lifetime>().unwrap(), Lifetime::Months(4_294_967_292));
    }

    #[test]
    fn test_out_of_range_delete_delay_fails_to_deserialize() {
        let json = serde_json::json!({
            "name": "acme",
            "owner": "alice",
            "start_time": "2024-01-01T00:00:00Z",
            "end_time": "2024-06-01T00:00:00Z",
            "delete_delay": i64::MAX,
        });

        let err = serde_json::from_value::<NewNetwork>(json).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_validate_rejects_bad_windows() {
        let start = at(2024, 1, 1);
        let ok = NewNetwork::new("acme", "alice", start).with_end_time(at(2024, 6, 1), Duration::days(30));
        assert!(ok.validate().is_ok());
        assert!(NewNetwork::new("acme", "alice", start).validate().is_ok());

        let negative = NewNetwork::new("acme", "alice", start).with_end_time(at(2024, 6, 1), Duration::days(-1));
        assert!(matches!(negative.validate(), Err(VanError::InvalidNetwork(_))));

        let backwards = NewNetwork::new("acme", "alice", start).with_end_time(at(2023, 6, 1), Duration::zero());
        assert!(matches!(backwards.validate(), Err(VanError::InvalidNetwork(_))));

        let huge = NewNetwork::new("acme", "alice", start)
            .with_end_time(at(2024, 6, 1), Duration::seconds(9_000_000_000_000_000));
        assert!(matches!(huge.validate(), Err(VanError::InvalidNetwork(_))));
    }

    #[test]
    fn test_huge_delete_delay_saturates_expiration() {
        let network = NewNetwork::new("acme", "alice", at(2024, 1, 1))
            .with_end_time(at(2024, 6, 1), Duration::seconds(9_000_000_000_000_000))
            .into_network(Uuid::new_v4());

        assert_eq!(network.ca_expiration(Lifetime::years(1)), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_delete_delay_serializes_as_seconds() {
        let network = NewNetwork::new("acme", "alice", at(2024, 1, 1))
            .with_end_time(at(2024, 6, 1), Duration::hours(2))
            .into_network(Uuid::new_v4());

        let json = serde_json::to_value(&network).unwrap();
        assert_eq!(json["delete_delay"], 7200);
        assert_eq!(json["status"], "new");
    }
}
