//! Worst-case buffer layout of a batch
//!
//! Everything a [`crate::Batch`] reserves is derived here from its
//! [`BatchConfig`]: every window full, every read at the maximum length,
//! every graph at its node/edge/alignment capacity.
//!
//! | Group | Buffers | Size per window |
//! |-------|---------|-----------------|
//! | Input | nucleotides, read lengths, window details | reads × max length |
//! | Output | consensus rows | one row (host: logical width, device: pitch) |
//! | Scratch | graph, edges, alignments, order, backtrace, DP matrix | node capacity × fan-out |

use crate::config::{BatchConfig, GraphLimits};
use crate::error::Result;
use crate::window::WindowDetails;

/// Device output rows are padded to this many bytes
pub const OUTPUT_PITCH_ALIGNMENT: usize = 256;

const MB: f64 = 1024.0 * 1024.0;

/// Sizes of every buffer a batch owns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    max_poas: usize,
    max_sequences_per_poa: usize,
    limits: GraphLimits,
}

impl BufferLayout {
    /// Validate the configuration and derive its layout
    pub fn new(config: &BatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            max_poas: config.max_poas,
            max_sequences_per_poa: config.max_sequences_per_poa,
            limits: config.limits,
        })
    }

    pub fn max_poas(&self) -> usize {
        self.max_poas
    }

    pub fn limits(&self) -> &GraphLimits {
        &self.limits
    }

    // ------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------

    /// Capacity of the flat nucleotide buffer (bytes)
    pub fn nucleotide_capacity(&self) -> usize {
        self.max_poas * self.max_sequences_per_poa * self.limits.max_sequence_size
    }

    /// Entries in the sequence-length array
    pub fn sequence_slots(&self) -> usize {
        self.max_poas * self.max_sequences_per_poa
    }

    pub fn input_bytes(&self) -> usize {
        self.nucleotide_capacity()
            + self.sequence_slots() * std::mem::size_of::<u16>()
            + self.max_poas * std::mem::size_of::<WindowDetails>()
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    /// Logical width of a decoded consensus row (host side)
    pub fn output_row_width(&self) -> usize {
        self.limits.max_sequence_size
    }

    /// Native row pitch of the device consensus buffer
    pub fn output_pitch(&self) -> usize {
        let width = self.limits.max_nodes_per_window;
        width.div_ceil(OUTPUT_PITCH_ALIGNMENT) * OUTPUT_PITCH_ALIGNMENT
    }

    pub fn host_output_bytes(&self) -> usize {
        self.max_poas * self.output_row_width()
    }

    pub fn device_output_bytes(&self) -> usize {
        self.max_poas * self.output_pitch()
    }

    // ------------------------------------------------------------------
    // Graph scratch (element counts)
    // ------------------------------------------------------------------

    /// Per-node arrays across all windows
    pub fn node_slots(&self) -> usize {
        self.max_poas * self.limits.max_nodes_per_window
    }

    /// Edge arrays (incoming or outgoing, ids or weights)
    pub fn edge_slots(&self) -> usize {
        self.node_slots() * self.limits.max_node_edges
    }

    /// Aligned-node link array
    pub fn alignment_slots(&self) -> usize {
        self.node_slots() * self.limits.max_node_alignments
    }

    /// DP score matrix cells
    pub fn score_cells(&self) -> usize {
        self.max_poas
            * self.limits.matrix_graph_dimension()
            * self.limits.matrix_sequence_dimension()
    }

    /// Graph/read alignment path entries
    pub fn alignment_path_slots(&self) -> usize {
        self.max_poas * self.limits.matrix_graph_dimension()
    }

    /// Bytes of the DP score matrix and its two alignment paths
    pub fn matrix_bytes(&self) -> usize {
        (self.score_cells() + 2 * self.alignment_path_slots()) * std::mem::size_of::<i16>()
    }

    /// Bytes of the graph arrays
    pub fn graph_bytes(&self) -> usize {
        let nodes = self.node_slots();
        let u16_size = std::mem::size_of::<u16>();

        // symbols, marks, aligned-node check flags
        let byte_arrays = 3 * nodes;
        // 4 edge arrays (ids and weights, both directions) + alignment links
        let fanout = (4 * self.edge_slots() + self.alignment_slots()) * u16_size;
        // edge counts x2, alignment count, sorted order, node map, local edge
        // count, nodes to visit
        let counts = 7 * nodes * u16_size;
        let backtrace = nodes * (std::mem::size_of::<i32>() + std::mem::size_of::<i16>());

        byte_arrays + fanout + counts + backtrace
    }

    pub fn scratch_bytes(&self) -> usize {
        self.matrix_bytes() + self.graph_bytes()
    }

    /// Page-locked host bytes
    pub fn host_bytes(&self) -> usize {
        self.input_bytes() + self.host_output_bytes()
    }

    /// Device bytes
    pub fn device_bytes(&self) -> usize {
        self.input_bytes() + self.device_output_bytes() + self.scratch_bytes()
    }

    /// Summary in MB for logs and reports
    pub fn summary(&self) -> LayoutSummary {
        LayoutSummary {
            max_poas: self.max_poas,
            max_sequences_per_poa: self.max_sequences_per_poa,
            input_mb: self.input_bytes() as f64 / MB,
            output_mb: self.device_output_bytes() as f64 / MB,
            scratch_mb: self.scratch_bytes() as f64 / MB,
            host_mb: self.host_bytes() as f64 / MB,
            device_mb: self.device_bytes() as f64 / MB,
        }
    }
}

/// Buffer reservation summary
#[derive(Debug, Clone, Copy)]
pub struct LayoutSummary {
    pub max_poas: usize,
    pub max_sequences_per_poa: usize,
    pub input_mb: f64,
    pub output_mb: f64,
    pub scratch_mb: f64,
    pub host_mb: f64,
    pub device_mb: f64,
}

impl std::fmt::Display for LayoutSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Batch Layout")?;
        writeln!(f, "============")?;
        writeln!(f, "Windows: {} x {} reads", self.max_poas, self.max_sequences_per_poa)?;
        writeln!(f, "Input buffers: {:.2} MB", self.input_mb)?;
        writeln!(f, "Output buffers: {:.2} MB", self.output_mb)?;
        writeln!(f, "Scratch buffers: {:.2} MB", self.scratch_mb)?;
        writeln!(f, "Host total: {:.2} MB", self.host_mb)?;
        write!(f, "Device total: {:.2} MB", self.device_mb)
    }
}
