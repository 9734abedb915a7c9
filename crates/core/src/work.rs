use serde::{Deserialize, Serialize};

use crate::error::ArbiterError;

/// Index of a worker slot in the fixed pool.
pub type WorkerId = usize;

/// One logical evaluation step of the controller loop.
pub type Round = u64;

/// Identifier assigned to a work item at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkId(pub u64);

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Priority class. Lower discriminant = served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Critical = 0,
    High = 1,
    Medium = 2,
    Low = 3,
    Background = 4,
}

impl Tier {
    pub const COUNT: usize = 5;

    /// All tiers in service order.
    pub const ALL: [Tier; Tier::COUNT] = [
        Tier::Critical,
        Tier::High,
        Tier::Medium,
        Tier::Low,
        Tier::Background,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Tier> {
        Tier::ALL.get(index).copied()
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Critical => write!(f, "critical"),
            Tier::High => write!(f, "high"),
            Tier::Medium => write!(f, "medium"),
            Tier::Low => write!(f, "low"),
            Tier::Background => write!(f, "background"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = ArbiterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Tier::Critical),
            "high" => Ok(Tier::High),
            "medium" => Ok(Tier::Medium),
            "low" => Ok(Tier::Low),
            "background" => Ok(Tier::Background),
            other => Err(ArbiterError::InvalidWorkItem(format!("unknown tier '{other}'"))),
        }
    }
}

/// Payload prefixes that mark a search target as corrupt.
const POISON_PREFIXES: [u32; 2] = [0xDEAD_BEEF, 0xFFFF_FFFF];

/// Opaque search-target descriptor handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload(pub Vec<u8>);

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reject empty, all-zero, oversized, and poison-prefixed payloads.
    pub fn validate(&self, max_len: usize) -> Result<(), ArbiterError> {
        if self.0.is_empty() {
            return Err(ArbiterError::InvalidWorkItem("empty payload".into()));
        }
        if self.0.len() > max_len {
            return Err(ArbiterError::InvalidWorkItem(format!(
                "payload is {} bytes, limit is {max_len}",
                self.0.len()
            )));
        }
        if self.0.iter().all(|b| *b == 0) {
            return Err(ArbiterError::InvalidWorkItem("all-zero payload".into()));
        }
        if self.0.len() >= 4 {
            let prefix = u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
            if POISON_PREFIXES.contains(&prefix) {
                return Err(ArbiterError::InvalidWorkItem(format!(
                    "payload prefix {prefix:#010x} is reserved"
                )));
            }
        }
        Ok(())
    }
}

/// A unit of search work. Immutable once admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkId,
    pub tier: Tier,
    pub payload: Payload,
    pub submitted_round: Round,
}

impl WorkItem {
    pub fn new(id: WorkId, tier: Tier, payload: Payload, submitted_round: Round) -> Self {
        Self {
            id,
            tier,
            payload,
            submitted_round,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering() {
        assert!(Tier::Critical < Tier::High);
        assert!(Tier::High < Tier::Medium);
        assert!(Tier::Low < Tier::Background);
        assert_eq!(Tier::from_index(4), Some(Tier::Background));
        assert_eq!(Tier::from_index(5), None);
    }

    #[test]
    fn tier_parse() {
        assert_eq!("Critical".parse::<Tier>().unwrap(), Tier::Critical);
        assert_eq!("background".parse::<Tier>().unwrap(), Tier::Background);
        assert!("urgent".parse::<Tier>().is_err());
    }

    #[test]
    fn payload_accepts_normal_bytes() {
        assert!(Payload::new(vec![1, 2, 3, 4, 5]).validate(256).is_ok());
        assert!(Payload::new(vec![7]).validate(256).is_ok());
    }

    #[test]
    fn payload_rejects_empty_and_zero() {
        assert!(Payload::new(Vec::new()).validate(256).is_err());
        assert!(Payload::new(vec![0; 32]).validate(256).is_err());
    }

    #[test]
    fn payload_rejects_poison_prefix() {
        let deadbeef = 0xDEAD_BEEFu32.to_le_bytes();
        let mut bytes = deadbeef.to_vec();
        bytes.extend_from_slice(&[1, 2, 3]);
        assert!(Payload::new(bytes).validate(256).is_err());
        assert!(Payload::new(vec![0xFF; 8]).validate(256).is_err());
    }

    #[test]
    fn payload_rejects_oversized() {
        let err = Payload::new(vec![1; 300]).validate(256).unwrap_err();
        assert!(matches!(err, ArbiterError::InvalidWorkItem(_)));
    }
}
