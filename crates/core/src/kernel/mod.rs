//! Consensus kernel interface
//!
//! The batch engine does not implement graph construction or scoring itself.
//! It hands a [`ConsensusKernel`] every device buffer of the batch and the
//! number of populated windows; the kernel processes one window per parallel
//! unit and writes each window's consensus into its output row.
//!
//! Output contract: row `w` of `consensus` starts at `w * consensus_pitch` and
//! holds the consensus symbols in reverse order followed by a NUL byte.

use crate::config::GraphLimits;
use crate::error::Result;
use crate::gpu::{DeviceBuffer, GpuStream};
use crate::scratch::GraphScratch;
use crate::window::WindowDetails;

#[cfg(not(feature = "cuda"))]
mod host;
#[cfg(not(feature = "cuda"))]
pub use host::LinearPathKernel;

#[cfg(feature = "cuda")]
mod cuda;
#[cfg(feature = "cuda")]
pub use cuda::PtxKernel;

/// Everything a kernel launch sees
pub struct KernelArgs<'a> {
    /// Populated windows; the kernel must ignore slots past this count
    pub window_count: usize,
    pub limits: GraphLimits,
    pub sequences: &'a DeviceBuffer<u8>,
    pub sequence_lengths: &'a DeviceBuffer<u16>,
    pub windows: &'a DeviceBuffer<WindowDetails>,
    pub scratch: &'a mut GraphScratch,
    pub consensus: &'a mut DeviceBuffer<u8>,
    /// Byte distance between consecutive output rows
    pub consensus_pitch: usize,
}

/// A consensus kernel that can be enqueued on a batch's stream
pub trait ConsensusKernel: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Enqueue one launch covering `args.window_count` windows.
    ///
    /// Must not synchronize the stream.
    fn launch(&self, stream: &GpuStream, args: KernelArgs<'_>) -> Result<()>;
}
