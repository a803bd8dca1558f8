//! Immutable runtime configuration
//!
//! The single-node vs distributed choice, along with the debugging toggles,
//! is read from the environment exactly once at startup and never changes
//! afterwards. Components receive a shared `RuntimeConfig` at construction;
//! nothing consults the environment after that.

use std::env;

use crate::error::{Error, Result};

/// Which runtime is driving kernel execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeMode {
    /// One process, direct launches
    SingleNode,
    /// Control node plus `nodes - 1` compute nodes driven by the
    /// signal-graph scheduler
    Distributed { nodes: u32 },
}

impl RuntimeMode {
    /// Whether the signal-graph scheduler is active
    pub const fn is_distributed(self) -> bool {
        matches!(self, RuntimeMode::Distributed { .. })
    }
}

/// Process-wide immutable configuration
///
/// # Environment
///
/// | Variable | Meaning | Default |
/// |----------|---------|---------|
/// | `TESSERA_VERBOSE` | per-launch dependency dumps, raises log level | off |
/// | `TESSERA_EXPERIMENTAL_SIGNALS` | enable the distributed scheduler | off |
/// | `TESSERA_PTX_DUMP` | write device intermediates to stderr | off |
/// | `TESSERA_NUM_PARTITIONS` | fleet size / CPU partition count | host parallelism |
/// | `TESSERA_GHOST_DEPTH` | halo width per axis | 2 |
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub mode: RuntimeMode,
    /// Print per-launch dependency dumps
    pub verbose: bool,
    /// Write generated device intermediates to stderr
    pub ptx_dump: bool,
    /// Partition count for CPU launches; fleet size in distributed mode
    pub num_partitions: u32,
    /// Halo width per axis for ghost exchange
    pub ghost_depth: u32,
}

impl RuntimeConfig {
    /// Build the configuration from the environment
    ///
    /// Call once at startup; the result is immutable thereafter.
    pub fn from_env() -> Result<Self> {
        let num_partitions = match env::var("TESSERA_NUM_PARTITIONS") {
            Ok(s) => s.parse::<u32>().ok().filter(|n| *n > 0).ok_or(Error::InvalidEnvValue {
                var: "TESSERA_NUM_PARTITIONS".into(),
                value: s,
            })?,
            Err(_) => std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1),
        };
        let ghost_depth = match env::var("TESSERA_GHOST_DEPTH") {
            Ok(s) => s.parse::<u32>().ok().filter(|n| *n > 0).ok_or(Error::InvalidEnvValue {
                var: "TESSERA_GHOST_DEPTH".into(),
                value: s,
            })?,
            Err(_) => 2,
        };
        let mode = if env_flag("TESSERA_EXPERIMENTAL_SIGNALS") {
            RuntimeMode::Distributed { nodes: num_partitions }
        } else {
            RuntimeMode::SingleNode
        };
        Ok(Self {
            mode,
            verbose: env_flag("TESSERA_VERBOSE"),
            ptx_dump: env_flag("TESSERA_PTX_DUMP"),
            num_partitions,
            ghost_depth,
        })
    }

    /// A single-node configuration with explicit partition count, for tests
    /// and embedders that bypass the environment
    pub fn single_node(num_partitions: u32) -> Self {
        Self {
            mode: RuntimeMode::SingleNode,
            verbose: false,
            ptx_dump: false,
            num_partitions: num_partitions.max(1),
            ghost_depth: 2,
        }
    }

    /// A distributed configuration, for tests and embedders
    pub fn distributed(nodes: u32) -> Self {
        Self {
            mode: RuntimeMode::Distributed { nodes },
            verbose: false,
            ptx_dump: false,
            num_partitions: nodes,
            ghost_depth: 2,
        }
    }
}

fn env_flag(var: &str) -> bool {
    matches!(
        env::var(var).as_deref(),
        Ok("1") | Ok("true") | Ok("yes") | Ok("on")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_node_defaults() {
        let cfg = RuntimeConfig::single_node(4);
        assert_eq!(cfg.mode, RuntimeMode::SingleNode);
        assert_eq!(cfg.num_partitions, 4);
        assert_eq!(cfg.ghost_depth, 2);
        assert!(!cfg.mode.is_distributed());
    }

    #[test]
    fn test_distributed_mode() {
        let cfg = RuntimeConfig::distributed(3);
        assert!(cfg.mode.is_distributed());
        assert_eq!(cfg.mode, RuntimeMode::Distributed { nodes: 3 });
    }

    #[test]
    fn test_partition_floor() {
        let cfg = RuntimeConfig::single_node(0);
        assert_eq!(cfg.num_partitions, 1);
    }
}
