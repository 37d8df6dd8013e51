//! Batch configuration
//!
//! Every buffer a [`crate::Batch`] owns is sized from a [`BatchConfig`] at
//! construction. The graph capacities that used to be compile-time constants
//! of the kernel live in [`GraphLimits`] and are validated against the
//! requested batch dimensions before anything is allocated.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PoaError, Result};

/// Fixed per-window capacities shared by the host packer and the consensus kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphLimits {
    /// Exclusive upper bound on a single read's length (symbols)
    pub max_sequence_size: usize,
    /// Maximum number of graph nodes per window
    pub max_nodes_per_window: usize,
    /// Maximum incoming (and outgoing) edges per node
    pub max_node_edges: usize,
    /// Maximum aligned-node links per node
    pub max_node_alignments: usize,
    /// Parallel block width of the kernel launch
    pub threads_per_block: usize,
}

impl Default for GraphLimits {
    fn default() -> Self {
        Self {
            max_sequence_size: 1024,
            max_nodes_per_window: 3072,
            max_node_edges: 50,
            max_node_alignments: 50,
            threads_per_block: 32,
        }
    }
}

impl GraphLimits {
    /// Rows of the per-window DP score matrix (one per graph node plus the origin)
    pub fn matrix_graph_dimension(&self) -> usize {
        self.max_nodes_per_window + 1
    }

    /// Columns of the per-window DP score matrix (one per read symbol plus the origin)
    pub fn matrix_sequence_dimension(&self) -> usize {
        self.max_sequence_size + 1
    }

    /// Validate the limits on their own
    pub fn validate(&self) -> Result<()> {
        if self.threads_per_block == 0 {
            return Err(PoaError::InvalidConfig(
                "threads_per_block must be non-zero".to_string(),
            ));
        }
        // One DP column per thread lane; the matrix dimension is one element larger.
        if self.max_sequence_size % self.threads_per_block != 0 {
            return Err(PoaError::InvalidConfig(format!(
                "max_sequence_size {} must be a multiple of the thread block size {}",
                self.max_sequence_size, self.threads_per_block
            )));
        }
        if self.max_nodes_per_window < self.max_sequence_size {
            return Err(PoaError::InvalidConfig(format!(
                "max_nodes_per_window {} cannot hold a single read of max_sequence_size {}",
                self.max_nodes_per_window, self.max_sequence_size
            )));
        }
        if self.max_node_edges == 0 || self.max_node_alignments == 0 {
            return Err(PoaError::InvalidConfig(
                "max_node_edges and max_node_alignments must be non-zero".to_string(),
            ));
        }
        // Backtrace predecessors are i16 on the device.
        if self.max_nodes_per_window > i16::MAX as usize {
            return Err(PoaError::InvalidConfig(format!(
                "max_nodes_per_window {} exceeds the 16-bit predecessor index (max {})",
                self.max_nodes_per_window,
                i16::MAX
            )));
        }
        // Node indices, sequence lengths and edge counts are u16 on the device.
        let u16_max = u16::MAX as usize;
        if self.max_nodes_per_window > u16_max
            || self.max_sequence_size > u16_max
            || self.max_node_edges > u16_max
            || self.max_node_alignments > u16_max
        {
            return Err(PoaError::InvalidConfig(format!(
                "graph limits must fit in 16-bit indices (max {})",
                u16_max
            )));
        }
        Ok(())
    }
}

/// Consensus kernel location for CUDA builds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Path to the compiled PTX module
    pub ptx_path: Option<PathBuf>,
    /// Kernel entry point inside the module
    pub entry_point: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            ptx_path: None,
            entry_point: "generate_poa_kernel".to_string(),
        }
    }
}

/// Complete batch configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of windows per launch
    pub max_poas: usize,
    /// Exclusive bound on reads per window
    pub max_sequences_per_poa: usize,
    /// Accelerator ordinal the batch allocates on
    pub device_id: usize,
    /// Per-window graph capacities
    pub limits: GraphLimits,
    /// Consensus kernel module
    pub kernel: KernelConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_poas: 100,
            max_sequences_per_poa: 100,
            device_id: 0,
            limits: GraphLimits::default(),
            kernel: KernelConfig::default(),
        }
    }
}

impl BatchConfig {
    /// Configuration for the given batch dimensions with default graph limits
    pub fn new(max_poas: usize, max_sequences_per_poa: usize) -> Self {
        Self {
            max_poas,
            max_sequences_per_poa,
            ..Self::default()
        }
    }

    /// Replace the graph limits
    pub fn with_limits(mut self, limits: GraphLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Select the accelerator ordinal
    pub fn with_device_id(mut self, device_id: usize) -> Self {
        self.device_id = device_id;
        self
    }

    /// Check every precondition the allocator relies on
    pub fn validate(&self) -> Result<()> {
        self.limits.validate()?;

        if self.max_poas == 0 {
            return Err(PoaError::InvalidConfig("max_poas must be non-zero".to_string()));
        }
        // The bound is exclusive: a limit of 1 leaves no usable slot.
        if self.max_sequences_per_poa < 2 {
            return Err(PoaError::InvalidConfig(format!(
                "max_sequences_per_poa {} leaves no room for a sequence (bound is exclusive)",
                self.max_sequences_per_poa
            )));
        }
        if self.max_sequences_per_poa > u16::MAX as usize {
            return Err(PoaError::InvalidConfig(format!(
                "max_sequences_per_poa {} exceeds the 16-bit per-window count",
                self.max_sequences_per_poa
            )));
        }

        // Window offsets are u32 on the device.
        let sequence_slots = self
            .max_poas
            .checked_mul(self.max_sequences_per_poa)
            .ok_or_else(|| PoaError::InvalidConfig("sequence slot count overflows".to_string()))?;
        let input_bytes = sequence_slots
            .checked_mul(self.limits.max_sequence_size)
            .ok_or_else(|| PoaError::InvalidConfig("input buffer size overflows".to_string()))?;
        if input_bytes > u32::MAX as usize {
            return Err(PoaError::InvalidConfig(format!(
                "input buffer of {} bytes exceeds 32-bit window offsets",
                input_bytes
            )));
        }

        let matrix = self
            .limits
            .matrix_graph_dimension()
            .checked_mul(self.limits.matrix_sequence_dimension())
            .and_then(|cells| cells.checked_mul(self.max_poas))
            .and_then(|cells| cells.checked_mul(std::mem::size_of::<i16>()));
        if matrix.is_none() {
            return Err(PoaError::InvalidConfig(
                "score matrix size overflows".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = env_usize("CUDAPOA_MAX_POAS") {
            config.max_poas = n;
        }
        if let Some(n) = env_usize("CUDAPOA_MAX_SEQUENCES_PER_POA") {
            config.max_sequences_per_poa = n;
        }
        if let Some(n) = env_usize("CUDAPOA_DEVICE_ID") {
            config.device_id = n;
        }
        if let Some(n) = env_usize("CUDAPOA_MAX_SEQUENCE_SIZE") {
            config.limits.max_sequence_size = n;
        }
        if let Some(n) = env_usize("CUDAPOA_MAX_NODES_PER_WINDOW") {
            config.limits.max_nodes_per_window = n;
        }
        if let Some(n) = env_usize("CUDAPOA_THREADS_PER_BLOCK") {
            config.limits.threads_per_block = n;
        }
        if let Ok(path) = std::env::var("CUDAPOA_PTX_PATH") {
            config.kernel.ptx_path = Some(PathBuf::from(path));
        }

        config
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| PoaError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| PoaError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.limits.matrix_graph_dimension(), 3073);
        assert_eq!(config.limits.matrix_sequence_dimension(), 1025);
    }

    #[test]
    fn test_sequence_size_must_match_block_width() {
        let limits = GraphLimits {
            max_sequence_size: 1000,
            ..GraphLimits::default()
        };
        let err = BatchConfig::new(4, 8).with_limits(limits).validate().unwrap_err();
        assert!(matches!(err, PoaError::InvalidConfig(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_node_capacity_must_hold_a_read() {
        let limits = GraphLimits {
            max_sequence_size: 256,
            max_nodes_per_window: 128,
            ..GraphLimits::default()
        };
        assert!(BatchConfig::new(4, 8).with_limits(limits).validate().is_err());
    }

    #[test]
    fn test_node_capacity_fits_predecessor_index() {
        let limits = GraphLimits {
            max_nodes_per_window: 40_000,
            ..GraphLimits::default()
        };
        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_batch_dimensions_rejected() {
        assert!(BatchConfig::new(0, 8).validate().is_err());
        assert!(BatchConfig::new(4, 1).validate().is_err());
        assert!(BatchConfig::new(4, 2).validate().is_ok());
        assert!(BatchConfig::new(4, 70_000).validate().is_err());
    }

    #[test]
    fn test_input_buffer_must_fit_u32_offsets() {
        // 10_000 * 1_000 * 1024 bytes > 4 GiB
        assert!(BatchConfig::new(10_000, 1_000).validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.toml");

        let limits = GraphLimits {
            max_sequence_size: 128,
            max_nodes_per_window: 256,
            max_node_edges: 8,
            max_node_alignments: 8,
            threads_per_block: 32,
        };
        let config = BatchConfig::new(16, 12).with_limits(limits).with_device_id(1);
        config.to_file(&path).unwrap();

        let loaded = BatchConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "max_poas = \"many\"").unwrap();

        let err = BatchConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, PoaError::Config(_)));
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("CUDAPOA_MAX_SEQUENCES_PER_POA", "33");
        std::env::set_var("CUDAPOA_THREADS_PER_BLOCK", "not-a-number");
        let config = BatchConfig::from_env();
        std::env::remove_var("CUDAPOA_MAX_SEQUENCES_PER_POA");
        std::env::remove_var("CUDAPOA_THREADS_PER_BLOCK");

        assert_eq!(config.max_sequences_per_poa, 33);
        // Unparseable values fall back to the default
        assert_eq!(config.limits.threads_per_block, 32);
    }
}
