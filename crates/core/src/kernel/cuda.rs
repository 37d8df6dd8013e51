//! PTX-backed consensus kernel

use cudarc::driver::{CudaFunction, LaunchConfig, PushKernelArg};
use cudarc::nvrtc::Ptx;

use super::{ConsensusKernel, KernelArgs};
use crate::config::KernelConfig;
use crate::error::{PoaError, Result};
use crate::gpu::{GpuDevice, GpuStream};

/// Consensus kernel loaded from a compiled PTX module.
///
/// Launched with one block per window and `threads_per_block` threads.
pub struct PtxKernel {
    function: CudaFunction,
    entry_point: String,
}

impl PtxKernel {
    /// Load the module named by `config` into the device's context
    pub fn load(device: &GpuDevice, config: &KernelConfig) -> Result<Self> {
        let path = config
            .ptx_path
            .as_ref()
            .ok_or_else(|| PoaError::Config("kernel.ptx_path is not set".to_string()))?;

        let ptx_src = std::fs::read_to_string(path)?;
        let module = device
            .cuda_context()
            .load_module(Ptx::from_src(ptx_src))
            .map_err(|e| PoaError::Gpu(format!("Failed to load PTX {:?}: {:?}", path, e)))?;
        let function = module.load_function(&config.entry_point).map_err(|e| {
            PoaError::Gpu(format!(
                "Failed to load kernel {}: {:?}",
                config.entry_point, e
            ))
        })?;

        tracing::info!(
            "Loaded consensus kernel {} from {:?} on GPU {}",
            config.entry_point,
            path,
            device.device_id
        );

        Ok(Self {
            function,
            entry_point: config.entry_point.clone(),
        })
    }
}

impl ConsensusKernel for PtxKernel {
    fn name(&self) -> &str {
        &self.entry_point
    }

    fn launch(&self, stream: &GpuStream, args: KernelArgs<'_>) -> Result<()> {
        if args.window_count == 0 {
            return Ok(());
        }

        let cfg = LaunchConfig {
            grid_dim: (args.window_count as u32, 1, 1),
            block_dim: (args.limits.threads_per_block as u32, 1, 1),
            shared_mem_bytes: 0,
        };

        let scratch = args.scratch;
        let window_count = args.window_count as u32;
        let pitch = args.consensus_pitch as u64;

        let mut builder = stream.cuda_stream().launch_builder(&self.function);
        // Inputs
        builder.arg(args.windows.cuda_slice());
        builder.arg(args.sequences.cuda_slice());
        builder.arg(args.sequence_lengths.cuda_slice());
        builder.arg(&window_count);
        // Output
        builder.arg(args.consensus.cuda_slice_mut());
        builder.arg(&pitch);
        // DP matrix
        builder.arg(scratch.scores.cuda_slice_mut());
        builder.arg(scratch.alignment_graph.cuda_slice_mut());
        builder.arg(scratch.alignment_read.cuda_slice_mut());
        // Graph
        builder.arg(scratch.nodes.cuda_slice_mut());
        builder.arg(scratch.incoming_edges.cuda_slice_mut());
        builder.arg(scratch.incoming_edge_count.cuda_slice_mut());
        builder.arg(scratch.outgoing_edges.cuda_slice_mut());
        builder.arg(scratch.outgoing_edge_count.cuda_slice_mut());
        builder.arg(scratch.incoming_edge_weights.cuda_slice_mut());
        builder.arg(scratch.outgoing_edge_weights.cuda_slice_mut());
        builder.arg(scratch.sorted_poa.cuda_slice_mut());
        builder.arg(scratch.sorted_poa_node_map.cuda_slice_mut());
        builder.arg(scratch.node_alignments.cuda_slice_mut());
        builder.arg(scratch.node_alignment_count.cuda_slice_mut());
        builder.arg(scratch.sorted_poa_local_edge_count.cuda_slice_mut());
        // Consensus backtrace
        builder.arg(scratch.consensus_scores.cuda_slice_mut());
        builder.arg(scratch.consensus_predecessors.cuda_slice_mut());
        builder.arg(scratch.node_marks.cuda_slice_mut());
        builder.arg(scratch.check_aligned_nodes.cuda_slice_mut());
        builder.arg(scratch.nodes_to_visit.cuda_slice_mut());

        // SAFETY: argument order and types match the kernel signature; every
        // buffer is owned by the batch and outlives the stream work.
        unsafe { builder.launch(cfg) }
            .map_err(|e| PoaError::Gpu(format!("Kernel launch failed: {:?}", e)))?;

        Ok(())
    }
}
