use serde::{Deserialize, Serialize};

/// Job priority levels for queue ordering (higher values drain first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    /// Drained after normal work
    Low = 1,

    /// Default
    Normal = 2,

    /// Drained before normal and low work
    High = 3,
}

// Claim ordering: sort_by_key(|r| (Reverse(r.priority), r.created_at, r.sequence))
// - high > normal > low
// - within a tier, oldest first

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl JobPriority {
    /// All priority levels, lowest first
    pub fn all() -> &'static [JobPriority] {
        &[Self::Low, Self::Normal, Self::High]
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(JobPriority::High > JobPriority::Normal);
        assert!(JobPriority::Normal > JobPriority::Low);
        assert_eq!(JobPriority::default(), JobPriority::Normal);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("HIGH".parse::<JobPriority>(), Ok(JobPriority::High));
        assert!("urgent".parse::<JobPriority>().is_err());
    }
}
