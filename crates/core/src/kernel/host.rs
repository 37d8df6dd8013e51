//! Host reference consensus kernel
//!
//! Builds, for every window, the path graph of its first read and lets the
//! remaining reads vote on the edges they agree with. The consensus is the
//! heaviest path through that graph, which for a path graph is the first read
//! itself. It exercises the full scratch and output contract of a real kernel
//! (graph arrays, topological order, backtrace scores and predecessors,
//! reverse-order NUL-terminated rows) without an accelerator.

use rayon::prelude::*;

use super::{ConsensusKernel, KernelArgs};
use crate::error::{PoaError, Result};
use crate::gpu::GpuStream;
use crate::scratch::WindowScratch;

/// Path-graph consensus, one rayon task per window
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearPathKernel;

impl LinearPathKernel {
    pub fn new() -> Self {
        Self
    }
}

impl ConsensusKernel for LinearPathKernel {
    fn name(&self) -> &str {
        "linear_path"
    }

    fn launch(&self, _stream: &GpuStream, args: KernelArgs<'_>) -> Result<()> {
        let KernelArgs {
            window_count,
            limits,
            sequences,
            sequence_lengths,
            windows,
            scratch,
            consensus,
            consensus_pitch,
        } = args;

        if window_count == 0 {
            return Ok(());
        }

        let max_edges = limits.max_node_edges;
        let sequences = sequences.as_slice();
        let lengths = sequence_lengths.as_slice();
        let windows = &windows.as_slice()[..window_count];
        let graphs = scratch.window_views(window_count, limits.max_nodes_per_window, max_edges);

        graphs
            .into_par_iter()
            .zip(consensus.as_mut_slice().par_chunks_mut(consensus_pitch))
            .zip(windows.par_iter())
            .enumerate()
            .try_for_each(|(index, ((mut graph, row), window))| {
                let mut reads = window.reads(sequences, lengths);
                // No reads or an empty first read: no graph to walk
                let backbone = match reads.next() {
                    Some(read) if !read.is_empty() => read,
                    _ => {
                        row[0] = 0;
                        return Ok(());
                    }
                };

                // Leave room for the terminator
                let capacity = graph.nodes.len().min(row.len() - 1);
                if backbone.len() > capacity {
                    return Err(PoaError::GraphOverflow {
                        window: index,
                        needed: backbone.len(),
                        capacity,
                    });
                }

                let node_count = build_graph(&mut graph, backbone, reads, max_edges);
                topological_sort(&mut graph, node_count);
                let best = score_nodes(&mut graph, node_count, max_edges);
                backtrace(&mut graph, best, row);
                Ok(())
            })
    }
}

/// Lay the backbone out as a chain and add one weight per agreeing read
fn build_graph<'r>(
    graph: &mut WindowScratch<'_>,
    backbone: &[u8],
    reads: impl Iterator<Item = &'r [u8]>,
    max_edges: usize,
) -> usize {
    let node_count = backbone.len();

    for (node, &symbol) in backbone.iter().enumerate() {
        graph.nodes[node] = symbol;
        graph.incoming_edge_count[node] = 0;
        graph.outgoing_edge_count[node] = 0;
        graph.node_marks[node] = 0;
    }

    for node in 1..node_count {
        let from = node - 1;
        graph.outgoing_edges[from * max_edges] = node as u16;
        graph.outgoing_edge_weights[from * max_edges] = 1;
        graph.outgoing_edge_count[from] = 1;
        graph.incoming_edges[node * max_edges] = from as u16;
        graph.incoming_edge_weights[node * max_edges] = 1;
        graph.incoming_edge_count[node] = 1;
    }

    for read in reads {
        let shared = read
            .iter()
            .zip(backbone)
            .take_while(|(a, b)| a == b)
            .count();
        for node in 1..shared {
            graph.outgoing_edge_weights[(node - 1) * max_edges] += 1;
            graph.incoming_edge_weights[node * max_edges] += 1;
        }
    }

    node_count
}

/// A chain is already in topological order
fn topological_sort(graph: &mut WindowScratch<'_>, node_count: usize) {
    for node in 0..node_count {
        graph.sorted_poa[node] = node as u16;
        graph.sorted_poa_node_map[node] = node as u16;
    }
}

/// Heaviest-path DP over the sorted nodes; returns the best end node
fn score_nodes(graph: &mut WindowScratch<'_>, node_count: usize, max_edges: usize) -> usize {
    let mut best = 0;

    for rank in 0..node_count {
        let node = graph.sorted_poa[rank] as usize;
        let mut score = 0i32;
        let mut predecessor = -1i16;

        for edge in 0..graph.incoming_edge_count[node] as usize {
            let slot = node * max_edges + edge;
            let from = graph.incoming_edges[slot] as usize;
            let candidate = graph.consensus_scores[from] + graph.incoming_edge_weights[slot] as i32;
            if candidate > score {
                score = candidate;
                predecessor = from as i16;
            }
        }

        graph.consensus_scores[node] = score;
        graph.consensus_predecessors[node] = predecessor;
        if score > graph.consensus_scores[best] {
            best = node;
        }
    }

    best
}

/// Follow predecessors from `best`, writing symbols end-first
fn backtrace(graph: &mut WindowScratch<'_>, best: usize, row: &mut [u8]) {
    let mut len = 0;
    let mut node = best as i16;

    while node >= 0 {
        let current = node as usize;
        graph.node_marks[current] = 1;
        row[len] = graph.nodes[current];
        len += 1;
        node = graph.consensus_predecessors[current];
    }

    row[len] = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BatchConfig, GraphLimits};
    use crate::gpu::{DeviceBuffer, GpuDevice};
    use crate::layout::BufferLayout;
    use crate::scratch::GraphScratch;
    use crate::window::WindowDetails;

    const PITCH: usize = 256;

    struct Fixture {
        stream: GpuStream,
        limits: GraphLimits,
        sequences: DeviceBuffer<u8>,
        lengths: DeviceBuffer<u16>,
        windows: DeviceBuffer<WindowDetails>,
        scratch: GraphScratch,
        consensus: DeviceBuffer<u8>,
        window_count: usize,
    }

    impl Fixture {
        /// Pack `windows` of reads straight into "device" buffers
        fn new(reads_per_window: &[&[&[u8]]]) -> Self {
            let limits = GraphLimits {
                max_sequence_size: 32,
                max_nodes_per_window: 40,
                max_node_edges: 3,
                max_node_alignments: 2,
                threads_per_block: 32,
            };
            let layout = BufferLayout::new(&BatchConfig::new(4, 4).with_limits(limits)).unwrap();
            let stream = GpuDevice::new(0).unwrap().default_stream();
            assert_eq!(layout.limits(), &limits);

            let mut nucleotides = Vec::new();
            let mut lengths = Vec::new();
            let mut details = Vec::new();
            for reads in reads_per_window {
                let mut window = WindowDetails::new(lengths.len() as u32, nucleotides.len() as u32);
                for read in reads.iter() {
                    nucleotides.extend_from_slice(read);
                    lengths.push(read.len() as u16);
                    window.seq_count += 1;
                }
                details.push(window);
            }

            let mut sequences = stream.alloc_zeros(256).unwrap();
            stream.copy_htod(&nucleotides, &mut sequences).unwrap();
            let mut seq_lengths = stream.alloc_zeros(layout.sequence_slots()).unwrap();
            stream.copy_htod(&lengths, &mut seq_lengths).unwrap();
            let mut windows = stream.alloc_zeros(layout.max_poas()).unwrap();
            stream.copy_htod(&details, &mut windows).unwrap();

            Self {
                scratch: GraphScratch::allocate(&stream, &layout).unwrap(),
                consensus: stream.alloc_zeros(layout.max_poas() * PITCH).unwrap(),
                stream,
                limits,
                sequences,
                lengths: seq_lengths,
                windows,
                window_count: reads_per_window.len(),
            }
        }

        fn launch(&mut self) -> Result<()> {
            let args = KernelArgs {
                window_count: self.window_count,
                limits: self.limits,
                sequences: &self.sequences,
                sequence_lengths: &self.lengths,
                windows: &self.windows,
                scratch: &mut self.scratch,
                consensus: &mut self.consensus,
                consensus_pitch: PITCH,
            };
            LinearPathKernel::new().launch(&self.stream, args)
        }

        fn row(&self, window: usize) -> &[u8] {
            let row = &self.consensus.as_slice()[window * PITCH..(window + 1) * PITCH];
            let end = row.iter().position(|&b| b == 0).unwrap();
            &row[..end]
        }
    }

    #[test]
    fn test_consensus_rows_are_reversed() {
        let mut fixture = Fixture::new(&[&[b"ACGT", b"ACGA", b"ACGT"], &[b"TTGC"]]);
        fixture.launch().unwrap();

        assert_eq!(fixture.row(0), b"TGCA");
        assert_eq!(fixture.row(1), b"CGTT");
    }

    #[test]
    fn test_agreeing_reads_weight_edges() {
        let mut fixture = Fixture::new(&[&[b"ACGT", b"ACGA", b"ACGT"]]);
        fixture.launch().unwrap();

        let weights = fixture.scratch.outgoing_edge_weights.as_slice();
        // edges 0->1, 1->2, 2->3 with a fan-out of 3
        assert_eq!([weights[0], weights[3], weights[6]], [3, 3, 2]);
        assert_eq!(&fixture.scratch.consensus_scores.as_slice()[..4], &[0, 3, 6, 8]);
        assert_eq!(&fixture.scratch.consensus_predecessors.as_slice()[..4], &[-1, 0, 1, 2]);
        assert!(fixture.scratch.node_marks.as_slice()[..4].iter().all(|&m| m == 1));
    }

    #[test]
    fn test_empty_window_writes_terminator() {
        let mut fixture = Fixture::new(&[&[], &[b"GA"]]);
        fixture.consensus.as_mut_slice()[0] = b'X';
        fixture.launch().unwrap();

        assert_eq!(fixture.row(0), b"");
        assert_eq!(fixture.row(1), b"AG");
    }

    #[test]
    fn test_empty_backbone_ignores_stale_graph() {
        let mut fixture = Fixture::new(&[&[b"", b"ACGT"]]);
        // Leftovers from an earlier launch in the same slot
        fixture.scratch.nodes.as_mut_slice()[..2].copy_from_slice(b"TT");
        fixture.scratch.consensus_predecessors.as_mut_slice()[0] = -1;
        fixture.consensus.as_mut_slice()[..2].copy_from_slice(b"TT");
        fixture.launch().unwrap();

        assert_eq!(fixture.row(0), b"");
    }

    #[test]
    fn test_graph_overflow_is_reported() {
        let long = [b'A'; 45];
        let mut fixture = Fixture::new(&[&[b"AC"], &[&long[..]]]);

        let err = fixture.launch().unwrap_err();
        assert!(matches!(
            err,
            PoaError::GraphOverflow {
                window: 1,
                needed: 45,
                capacity: 40
            }
        ));
    }
}
