//! cudapoa core - batched partial-order-alignment consensus
//!
//! This crate packs many independent consensus problems ("windows", each a
//! small set of overlapping reads) into fixed-capacity buffers and processes
//! them with one parallel kernel launch per batch.
//!
//! # Architecture
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | Batch dimensions and graph capacities (TOML, env) |
//! | [`layout`] | Worst-case size of every buffer a batch reserves |
//! | [`batch`] | Packing, transfer, dispatch, retrieval, reset |
//! | [`kernel`] | Consensus kernel seam and its implementations |
//! | [`gpu`] | Device, stream and buffer wrappers over cudarc |
//!
//! # Backends
//!
//! With the `cuda` feature, buffers live on the accelerator and the consensus
//! kernel is loaded from a PTX module ([`kernel::PtxKernel`]). Without it,
//! buffers are host memory, stream operations complete in call order and the
//! reference [`kernel::LinearPathKernel`] runs windows in parallel on rayon.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(not(feature = "cuda"))]
//! # fn main() -> cudapoa_core::Result<()> {
//! use cudapoa_core::{Batch, BatchConfig, LinearPathKernel};
//!
//! let mut batch = Batch::new(BatchConfig::new(8, 16))?;
//! batch.add_window()?;
//! batch.add_sequence(b"ACGT")?;
//! batch.add_sequence(b"ACGA")?;
//!
//! batch.generate_poa(&LinearPathKernel::new())?;
//! let consensus = batch.get_consensus()?;
//! assert_eq!(consensus[0], "ACGT");
//! # Ok(())
//! # }
//! # #[cfg(feature = "cuda")]
//! # fn main() {}
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod gpu;
pub mod kernel;
pub mod layout;
pub mod scratch;
pub mod window;

pub use batch::{Batch, BatchId};
pub use config::{BatchConfig, GraphLimits, KernelConfig};
pub use error::{PoaError, Result};
pub use gpu::{DeviceBuffer, GpuDevice, GpuStream, HostBuffer};
pub use kernel::{ConsensusKernel, KernelArgs};
#[cfg(not(feature = "cuda"))]
pub use kernel::LinearPathKernel;
#[cfg(feature = "cuda")]
pub use kernel::PtxKernel;
pub use layout::{BufferLayout, LayoutSummary};
pub use scratch::GraphScratch;
pub use window::WindowDetails;
