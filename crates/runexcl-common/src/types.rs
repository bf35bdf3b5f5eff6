//! Domain primitive types used across the runexcl workspace.

use std::fmt;
use std::str::FromStr;

/// Scheduling-domain type of a cpuset partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionType {
    /// Own scheduling domain, isolated from sibling cgroups.
    Root,
    /// Like [`PartitionType::Root`], additionally without load balancing
    /// and kernel housekeeping.
    Isolated,
}

impl PartitionType {
    /// Token written to and read back from `cpuset.cpus.partition`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Isolated => "isolated",
        }
    }
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartitionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(Self::Root),
            "isolated" => Ok(Self::Isolated),
            other => Err(other.to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_type_tokens_round_trip() {
        for kind in [PartitionType::Root, PartitionType::Isolated] {
            assert_eq!(kind.as_str().parse::<PartitionType>(), Ok(kind));
        }
    }

    #[test]
    fn invalid_partition_report_is_not_a_type() {
        assert!("root invalid (cpus not exclusive)".parse::<PartitionType>().is_err());
        assert!("member".parse::<PartitionType>().is_err());
    }
}
