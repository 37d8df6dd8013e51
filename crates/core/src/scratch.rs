//! Accelerator-only working memory of the consensus kernel
//!
//! Each array holds `max_poas` fixed-size per-window regions. The kernel owns
//! the contents; the host never reads them back. Buffers are initialized once
//! at construction and not cleared between batches, so a kernel must fully
//! overwrite the region of every window it processes.

use crate::error::Result;
use crate::gpu::{DeviceBuffer, GpuStream};
use crate::layout::BufferLayout;

/// Per-window graph, ordering, backtrace and DP buffers
#[derive(Debug)]
pub struct GraphScratch {
    // Needleman-Wunsch score matrix and the two alignment paths
    pub scores: DeviceBuffer<i16>,
    pub alignment_graph: DeviceBuffer<i16>,
    pub alignment_read: DeviceBuffer<i16>,

    // Graph
    pub nodes: DeviceBuffer<u8>,
    pub node_alignments: DeviceBuffer<u16>,
    pub node_alignment_count: DeviceBuffer<u16>,
    pub incoming_edges: DeviceBuffer<u16>,
    pub incoming_edge_count: DeviceBuffer<u16>,
    pub outgoing_edges: DeviceBuffer<u16>,
    pub outgoing_edge_count: DeviceBuffer<u16>,
    pub incoming_edge_weights: DeviceBuffer<u16>,
    pub outgoing_edge_weights: DeviceBuffer<u16>,

    // Topological order
    pub sorted_poa: DeviceBuffer<u16>,
    pub sorted_poa_node_map: DeviceBuffer<u16>,
    pub sorted_poa_local_edge_count: DeviceBuffer<u16>,

    // Consensus backtrace
    pub consensus_scores: DeviceBuffer<i32>,
    pub consensus_predecessors: DeviceBuffer<i16>,
    pub node_marks: DeviceBuffer<u8>,
    pub check_aligned_nodes: DeviceBuffer<u8>,
    pub nodes_to_visit: DeviceBuffer<u16>,
}

impl GraphScratch {
    /// Reserve scratch for every window slot of the layout.
    ///
    /// Backtrace scores and predecessors start at -1 (no path); everything
    /// else starts zeroed.
    pub fn allocate(stream: &GpuStream, layout: &BufferLayout) -> Result<Self> {
        let nodes = layout.node_slots();
        let edges = layout.edge_slots();

        Ok(Self {
            scores: stream.alloc_zeros(layout.score_cells())?,
            alignment_graph: stream.alloc_zeros(layout.alignment_path_slots())?,
            alignment_read: stream.alloc_zeros(layout.alignment_path_slots())?,

            nodes: stream.alloc_zeros(nodes)?,
            node_alignments: stream.alloc_zeros(layout.alignment_slots())?,
            node_alignment_count: stream.alloc_zeros(nodes)?,
            incoming_edges: stream.alloc_zeros(edges)?,
            incoming_edge_count: stream.alloc_zeros(nodes)?,
            outgoing_edges: stream.alloc_zeros(edges)?,
            outgoing_edge_count: stream.alloc_zeros(nodes)?,
            incoming_edge_weights: stream.alloc_zeros(edges)?,
            outgoing_edge_weights: stream.alloc_zeros(edges)?,

            sorted_poa: stream.alloc_zeros(nodes)?,
            sorted_poa_node_map: stream.alloc_zeros(nodes)?,
            sorted_poa_local_edge_count: stream.alloc_zeros(nodes)?,

            consensus_scores: stream.alloc_filled(nodes, -1i32)?,
            consensus_predecessors: stream.alloc_filled(nodes, -1i16)?,
            node_marks: stream.alloc_zeros(nodes)?,
            check_aligned_nodes: stream.alloc_zeros(nodes)?,
            nodes_to_visit: stream.alloc_zeros(nodes)?,
        })
    }

    /// Bytes reserved across all scratch buffers
    pub fn size_bytes(&self) -> usize {
        self.scores.size_bytes()
            + self.alignment_graph.size_bytes()
            + self.alignment_read.size_bytes()
            + self.nodes.size_bytes()
            + self.node_alignments.size_bytes()
            + self.node_alignment_count.size_bytes()
            + self.incoming_edges.size_bytes()
            + self.incoming_edge_count.size_bytes()
            + self.outgoing_edges.size_bytes()
            + self.outgoing_edge_count.size_bytes()
            + self.incoming_edge_weights.size_bytes()
            + self.outgoing_edge_weights.size_bytes()
            + self.sorted_poa.size_bytes()
            + self.sorted_poa_node_map.size_bytes()
            + self.sorted_poa_local_edge_count.size_bytes()
            + self.consensus_scores.size_bytes()
            + self.consensus_predecessors.size_bytes()
            + self.node_marks.size_bytes()
            + self.check_aligned_nodes.size_bytes()
            + self.nodes_to_visit.size_bytes()
    }
}

/// Mutable view of one window's graph region (host backend)
#[cfg(not(feature = "cuda"))]
pub struct WindowScratch<'a> {
    pub nodes: &'a mut [u8],
    pub incoming_edges: &'a mut [u16],
    pub incoming_edge_count: &'a mut [u16],
    pub outgoing_edges: &'a mut [u16],
    pub outgoing_edge_count: &'a mut [u16],
    pub incoming_edge_weights: &'a mut [u16],
    pub outgoing_edge_weights: &'a mut [u16],
    pub sorted_poa: &'a mut [u16],
    pub sorted_poa_node_map: &'a mut [u16],
    pub consensus_scores: &'a mut [i32],
    pub consensus_predecessors: &'a mut [i16],
    pub node_marks: &'a mut [u8],
}

#[cfg(not(feature = "cuda"))]
impl GraphScratch {
    /// Split the graph arrays into disjoint per-window views for the first
    /// `windows` slots.
    pub fn window_views(
        &mut self,
        windows: usize,
        max_nodes: usize,
        max_edges: usize,
    ) -> Vec<WindowScratch<'_>> {
        let fanout = max_nodes * max_edges;

        let mut nodes = self.nodes.as_mut_slice();
        let mut incoming_edges = self.incoming_edges.as_mut_slice();
        let mut incoming_edge_count = self.incoming_edge_count.as_mut_slice();
        let mut outgoing_edges = self.outgoing_edges.as_mut_slice();
        let mut outgoing_edge_count = self.outgoing_edge_count.as_mut_slice();
        let mut incoming_edge_weights = self.incoming_edge_weights.as_mut_slice();
        let mut outgoing_edge_weights = self.outgoing_edge_weights.as_mut_slice();
        let mut sorted_poa = self.sorted_poa.as_mut_slice();
        let mut sorted_poa_node_map = self.sorted_poa_node_map.as_mut_slice();
        let mut consensus_scores = self.consensus_scores.as_mut_slice();
        let mut consensus_predecessors = self.consensus_predecessors.as_mut_slice();
        let mut node_marks = self.node_marks.as_mut_slice();

        (0..windows)
            .map(|_| WindowScratch {
                nodes: take(&mut nodes, max_nodes),
                incoming_edges: take(&mut incoming_edges, fanout),
                incoming_edge_count: take(&mut incoming_edge_count, max_nodes),
                outgoing_edges: take(&mut outgoing_edges, fanout),
                outgoing_edge_count: take(&mut outgoing_edge_count, max_nodes),
                incoming_edge_weights: take(&mut incoming_edge_weights, fanout),
                outgoing_edge_weights: take(&mut outgoing_edge_weights, fanout),
                sorted_poa: take(&mut sorted_poa, max_nodes),
                sorted_poa_node_map: take(&mut sorted_poa_node_map, max_nodes),
                consensus_scores: take(&mut consensus_scores, max_nodes),
                consensus_predecessors: take(&mut consensus_predecessors, max_nodes),
                node_marks: take(&mut node_marks, max_nodes),
            })
            .collect()
    }
}

/// Split `n` elements off the front of `rest`
#[cfg(not(feature = "cuda"))]
fn take<'a, T>(rest: &mut &'a mut [T], n: usize) -> &'a mut [T] {
    let (head, tail) = std::mem::take(rest).split_at_mut(n);
    *rest = tail;
    head
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BatchConfig, GraphLimits};
    use crate::gpu::GpuDevice;

    fn layout() -> BufferLayout {
        let limits = GraphLimits {
            max_sequence_size: 32,
            max_nodes_per_window: 40,
            max_node_edges: 3,
            max_node_alignments: 2,
            threads_per_block: 32,
        };
        BufferLayout::new(&BatchConfig::new(3, 4).with_limits(limits)).unwrap()
    }

    #[test]
    fn test_scratch_matches_layout() {
        let device = GpuDevice::new(0).unwrap();
        let layout = layout();
        let scratch = GraphScratch::allocate(&device.default_stream(), &layout).unwrap();

        assert_eq!(scratch.size_bytes(), layout.scratch_bytes());
        assert_eq!(scratch.incoming_edges.len(), 3 * 40 * 3);
        assert_eq!(scratch.scores.len(), 3 * 41 * 33);
    }

    #[test]
    #[cfg(not(feature = "cuda"))]
    fn test_backtrace_starts_unset() {
        let device = GpuDevice::new(0).unwrap();
        let scratch = GraphScratch::allocate(&device.default_stream(), &layout()).unwrap();

        assert!(scratch.consensus_scores.as_slice().iter().all(|&s| s == -1));
        assert!(scratch.consensus_predecessors.as_slice().iter().all(|&p| p == -1));
        assert!(scratch.nodes.as_slice().iter().all(|&n| n == 0));
    }

    #[test]
    #[cfg(not(feature = "cuda"))]
    fn test_window_views_are_disjoint() {
        let device = GpuDevice::new(0).unwrap();
        let mut scratch = GraphScratch::allocate(&device.default_stream(), &layout()).unwrap();

        {
            let mut views = scratch.window_views(2, 40, 3);
            assert_eq!(views.len(), 2);
            assert_eq!(views[0].nodes.len(), 40);
            assert_eq!(views[1].outgoing_edges.len(), 120);
            views[1].nodes[0] = b'G';
        }

        assert_eq!(scratch.nodes.as_slice()[40], b'G');
        assert_eq!(scratch.nodes.as_slice()[0], 0);
    }
}
