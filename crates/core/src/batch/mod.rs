//! Batch engine
//!
//! A [`Batch`] packs many independent windows into fixed-capacity buffers and
//! runs them through one consensus kernel launch:
//!
//! 1. `add_window` / `add_sequence` fill page-locked host buffers
//! 2. `generate_poa` copies the populated prefix to the device and launches
//! 3. `get_consensus` copies the output rows back, synchronizes once, decodes
//! 4. `reset` clears the cycle so the same buffers can be reused
//!
//! Every buffer is reserved at construction for the worst case described by
//! the [`BufferLayout`]; nothing is allocated afterwards.

mod pack;
mod pipeline;

use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::BatchConfig;
use crate::error::{PoaError, Result};
use crate::gpu::{DeviceBuffer, GpuDevice, GpuStream, HostBuffer};
use crate::layout::BufferLayout;
use crate::scratch::GraphScratch;
use crate::window::WindowDetails;

static NEXT_BATCH_ID: AtomicU32 = AtomicU32::new(0);

/// Process-unique batch identifier, used to tag log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(u32);

impl BatchId {
    /// Draw the next identifier from the process-wide counter
    pub fn next() -> Self {
        Self(NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reusable, capacity-bounded POA batch
pub struct Batch {
    id: BatchId,
    config: BatchConfig,
    layout: BufferLayout,
    device: GpuDevice,
    stream: GpuStream,

    // Host staging (page-locked)
    host_sequences: HostBuffer<u8>,
    host_sequence_lengths: HostBuffer<u16>,
    host_windows: HostBuffer<WindowDetails>,
    host_consensus: HostBuffer<u8>,

    // Device inputs and output
    sequences: DeviceBuffer<u8>,
    sequence_lengths: DeviceBuffer<u16>,
    windows: DeviceBuffer<WindowDetails>,
    consensus: DeviceBuffer<u8>,

    scratch: GraphScratch,

    // Per-cycle state
    window_count: usize,
    total_sequences: usize,
    total_nucleotides: usize,
    consensus_strings: Vec<String>,
}

impl Batch {
    /// Allocate a batch on `config.device_id` with a fresh identifier
    pub fn new(config: BatchConfig) -> Result<Self> {
        Self::with_id(BatchId::next(), config)
    }

    /// Allocate a batch with a caller-chosen identifier
    pub fn with_id(id: BatchId, config: BatchConfig) -> Result<Self> {
        let layout = BufferLayout::new(&config)?;

        let device = GpuDevice::new(config.device_id)?;
        device.bind_to_thread()?;
        let stream = device.new_stream()?;

        let host_sequences = device.alloc_host(layout.nucleotide_capacity())?;
        let host_sequence_lengths = device.alloc_host(layout.sequence_slots())?;
        let host_windows = device.alloc_host(layout.max_poas())?;
        let host_consensus = device.alloc_host(layout.host_output_bytes())?;

        let sequences = stream.alloc_zeros(layout.nucleotide_capacity())?;
        let sequence_lengths = stream.alloc_zeros(layout.sequence_slots())?;
        let windows = stream.alloc_zeros(layout.max_poas())?;
        let consensus = stream.alloc_zeros(layout.device_output_bytes())?;
        let scratch = GraphScratch::allocate(&stream, &layout)?;
        stream.synchronize()?;

        let summary = layout.summary();
        tracing::info!(batch_id = %id, "Allocated input buffers of size {:.2} MB", summary.input_mb);
        tracing::info!(batch_id = %id, "Allocated output buffers of size {:.2} MB", summary.output_mb);
        tracing::info!(
            batch_id = %id,
            "Allocated temp buffers of size {:.2} MB (graph {:.2} MB)",
            summary.scratch_mb,
            scratch.size_bytes() as f64 / (1024.0 * 1024.0)
        );

        Ok(Self {
            id,
            config,
            layout,
            device,
            stream,
            host_sequences,
            host_sequence_lengths,
            host_windows,
            host_consensus,
            sequences,
            sequence_lengths,
            windows,
            consensus,
            scratch,
            window_count: 0,
            total_sequences: 0,
            total_nucleotides: 0,
            consensus_strings: Vec::new(),
        })
    }

    pub fn batch_id(&self) -> BatchId {
        self.id
    }

    /// Number of windows opened in the current cycle
    pub fn get_total_poas(&self) -> usize {
        self.window_count
    }

    /// Sequences appended in the current cycle
    pub fn total_sequences(&self) -> usize {
        self.total_sequences
    }

    /// Symbols appended in the current cycle
    pub fn total_nucleotides(&self) -> usize {
        self.total_nucleotides
    }

    pub fn max_poas(&self) -> usize {
        self.config.max_poas
    }

    pub fn max_sequences_per_poa(&self) -> usize {
        self.config.max_sequences_per_poa
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    pub fn device_id(&self) -> usize {
        self.device.device_id
    }

    /// Select the device the batch binds before enqueueing work.
    ///
    /// Buffers belong to the device they were allocated on, so only that
    /// ordinal is accepted.
    pub fn set_device_id(&mut self, device_id: usize) -> Result<()> {
        if device_id != self.device.device_id {
            return Err(PoaError::InvalidConfig(format!(
                "batch {} owns buffers on device {}, cannot move to device {}",
                self.id, self.device.device_id, device_id
            )));
        }
        Ok(())
    }

    /// Replace the stream all transfers and launches are enqueued on
    pub fn set_stream(&mut self, stream: GpuStream) -> Result<()> {
        if stream.device_id() != self.device.device_id {
            return Err(PoaError::InvalidConfig(format!(
                "stream belongs to device {}, batch {} is on device {}",
                stream.device_id(),
                self.id,
                self.device.device_id
            )));
        }
        self.stream = stream;
        Ok(())
    }

    pub fn stream(&self) -> &GpuStream {
        &self.stream
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        tracing::debug!(batch_id = %self.id, "Destroyed buffers");
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("id", &self.id)
            .field("device_id", &self.device.device_id)
            .field("windows", &self.window_count)
            .field("sequences", &self.total_sequences)
            .field("nucleotides", &self.total_nucleotides)
            .finish()
    }
}

/// Decode one output row: symbols up to the first NUL, stored end-first
pub(crate) fn decode_consensus_row(row: &[u8]) -> String {
    let end = row.iter().position(|&b| b == 0).unwrap_or(row.len());
    let bytes: Vec<u8> = row[..end].iter().rev().copied().collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_ids_increase() {
        let a = BatchId::next();
        let b = BatchId::next();
        assert!(b > a);
        assert_eq!(BatchId::new(7).to_string(), "7");
    }

    #[test]
    fn test_decode_reverses_up_to_nul() {
        assert_eq!(decode_consensus_row(b"TGCA\0GG"), "ACGT");
        assert_eq!(decode_consensus_row(b"\0ACGT"), "");
        // no terminator: whole row
        assert_eq!(decode_consensus_row(b"CA"), "AC");
        assert_eq!(decode_consensus_row(&[b'A', 0xFF]), "\u{FFFD}A");
    }

    #[test]
    fn test_invalid_config_allocates_nothing() {
        let err = Batch::new(BatchConfig::new(0, 4)).unwrap_err();
        assert!(matches!(err, PoaError::InvalidConfig(_)));
    }

    #[test]
    #[cfg(not(feature = "cuda"))]
    fn test_device_and_stream_binding() {
        let mut batch = Batch::new(BatchConfig::new(2, 4)).unwrap();
        assert_eq!(batch.device_id(), 0);
        assert!(batch.set_device_id(0).is_ok());
        assert!(batch.set_device_id(3).is_err());

        let other = GpuDevice::new(1).unwrap().default_stream();
        assert!(batch.set_stream(other).is_err());
        let same = GpuDevice::new(0).unwrap().new_stream().unwrap();
        assert!(batch.set_stream(same).is_ok());
    }
}
