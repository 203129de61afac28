//! Target environments and their rollout policies
//!
//! The environment is a closed enumeration; each carries the policy that
//! drives the orchestrator: which strategy rolls artifacts out, whether a
//! human approval gates the deploy stage, and how many unhealthy nodes a
//! cluster tolerates before it counts as Unhealthy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deployment target environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Qa,
    Staging,
    Production,
}

/// Which rollout strategy an environment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    Direct,
    Rolling,
    BlueGreen,
    Canary,
}

impl Environment {
    pub const ALL: [Environment; 4] = [
        Environment::Development,
        Environment::Qa,
        Environment::Staging,
        Environment::Production,
    ];

    /// The strategy that rolls artifacts out to this environment.
    pub fn strategy_kind(&self) -> StrategyKind {
        match self {
            Environment::Development => StrategyKind::Direct,
            Environment::Qa => StrategyKind::Rolling,
            Environment::Staging => StrategyKind::BlueGreen,
            Environment::Production => StrategyKind::Canary,
        }
    }

    /// Whether promotions into this environment require a human approval.
    pub fn requires_approval(&self) -> bool {
        matches!(self, Environment::Staging | Environment::Production)
    }

    /// How many unhealthy nodes the cluster tolerates while still counting
    /// as Degraded rather than Unhealthy.
    pub fn unhealthy_tolerance(&self) -> usize {
        match self {
            Environment::Development => 3,
            Environment::Qa => 2,
            Environment::Staging | Environment::Production => 1,
        }
    }

    /// Production always verifies signatures strictly; elsewhere the
    /// security config decides.
    pub fn forces_strict_security(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Qa => "qa",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "qa" => Ok(Environment::Qa),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approval_gates() {
        assert!(!Environment::Development.requires_approval());
        assert!(!Environment::Qa.requires_approval());
        assert!(Environment::Staging.requires_approval());
        assert!(Environment::Production.requires_approval());
    }

    #[test]
    fn test_strategy_mapping() {
        assert_eq!(
            Environment::Development.strategy_kind(),
            StrategyKind::Direct
        );
        assert_eq!(Environment::Qa.strategy_kind(), StrategyKind::Rolling);
        assert_eq!(Environment::Staging.strategy_kind(), StrategyKind::BlueGreen);
        assert_eq!(Environment::Production.strategy_kind(), StrategyKind::Canary);
    }

    #[test]
    fn test_parse_round_trip() {
        for env in Environment::ALL {
            assert_eq!(env.as_str().parse::<Environment>().unwrap(), env);
        }
        assert!("lunar".parse::<Environment>().is_err());
    }
}
