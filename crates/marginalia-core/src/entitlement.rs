//! Entitlement tiers and the gate the core consults for tier limits

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// Subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Premium,
}

impl Tier {
    /// Versions kept per note, `None` for unbounded
    pub const fn version_retention(self) -> Option<usize> {
        match self {
            Self::Free => Some(5),
            Self::Premium => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "premium" => Ok(Self::Premium),
            other => Err(crate::Error::InvalidInput(format!("Unknown tier '{other}'"))),
        }
    }
}

/// Body of `GET /v1/entitlement`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementResponse {
    pub tier: Tier,
}

/// Source of the current entitlement tier
pub trait EntitlementGate: Send + Sync {
    fn current_tier(&self) -> Tier;
}

/// Fixed tier
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticEntitlement(pub Tier);

impl EntitlementGate for StaticEntitlement {
    fn current_tier(&self) -> Tier {
        self.0
    }
}

/// Tier that can be updated at runtime, e.g. after an entitlement refresh
#[derive(Debug, Default)]
pub struct SharedEntitlement {
    tier: RwLock<Tier>,
}

impl SharedEntitlement {
    pub fn new(tier: Tier) -> Self {
        Self {
            tier: RwLock::new(tier),
        }
    }

    pub fn set_tier(&self, tier: Tier) {
        match self.tier.write() {
            Ok(mut guard) => *guard = tier,
            Err(poisoned) => *poisoned.into_inner() = tier,
        }
    }
}

impl EntitlementGate for SharedEntitlement {
    fn current_tier(&self) -> Tier {
        match self.tier.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
