//! Transfer, dispatch, retrieval and reset

use super::{decode_consensus_row, Batch};
use crate::error::Result;
use crate::kernel::{ConsensusKernel, KernelArgs};

impl Batch {
    /// Enqueue the populated inputs and one kernel launch on the batch stream.
    ///
    /// Only the filled prefix of each input buffer is transferred. Does not
    /// wait for the launch to finish; [`Batch::get_consensus`] does.
    pub fn generate_poa(&mut self, kernel: &dyn ConsensusKernel) -> Result<()> {
        if self.window_count == 0 {
            tracing::debug!(batch_id = %self.id, "No windows to process");
            return Ok(());
        }

        self.device.bind_to_thread()?;

        let nucleotides = &self.host_sequences.as_slice()?[..self.total_nucleotides];
        self.stream.copy_htod(nucleotides, &mut self.sequences)?;
        let windows = &self.host_windows.as_slice()?[..self.window_count];
        self.stream.copy_htod(windows, &mut self.windows)?;
        let lengths = &self.host_sequence_lengths.as_slice()?[..self.total_sequences];
        self.stream.copy_htod(lengths, &mut self.sequence_lengths)?;

        tracing::info!(
            batch_id = %self.id,
            "Launching {} kernel for {} windows",
            kernel.name(),
            self.window_count
        );

        kernel.launch(
            &self.stream,
            KernelArgs {
                window_count: self.window_count,
                limits: self.config.limits,
                sequences: &self.sequences,
                sequence_lengths: &self.sequence_lengths,
                windows: &self.windows,
                scratch: &mut self.scratch,
                consensus: &mut self.consensus,
                consensus_pitch: self.layout.output_pitch(),
            },
        )?;

        tracing::info!(batch_id = %self.id, "Launched kernel");
        Ok(())
    }

    /// Copy the consensus rows back, wait for the stream and decode them.
    ///
    /// Decoded strings are appended to the batch's results, so calling this
    /// twice without [`Batch::reset`] returns every window twice.
    pub fn get_consensus(&mut self) -> Result<&[String]> {
        if self.window_count == 0 {
            // Still wait for anything reset enqueued
            self.stream.synchronize()?;
            return Ok(&self.consensus_strings);
        }

        let width = self.layout.output_row_width();
        tracing::info!(batch_id = %self.id, "Transferring consensus to host");
        self.stream.copy_rows_dtoh(
            &self.consensus,
            self.layout.output_pitch(),
            &mut self.host_consensus,
            width,
            width,
            self.layout.max_poas(),
        )?;
        self.stream.synchronize()?;
        tracing::info!(batch_id = %self.id, "Transferred consensus to host");

        let rows = self.host_consensus.as_slice()?;
        self.consensus_strings.extend(
            rows.chunks_exact(width)
                .take(self.window_count)
                .map(decode_consensus_row),
        );

        Ok(&self.consensus_strings)
    }

    /// Clear the current cycle so the batch can be packed again.
    ///
    /// Host and device input buffers are zeroed alike. Graph scratch is left
    /// as is; the kernel overwrites what it uses.
    pub fn reset(&mut self) -> Result<()> {
        self.window_count = 0;
        self.total_sequences = 0;
        self.total_nucleotides = 0;
        self.consensus_strings.clear();

        self.host_sequences.as_mut_slice()?.fill(0);
        self.host_sequence_lengths.as_mut_slice()?.fill(0);
        self.host_windows.as_mut_slice()?.fill(Default::default());
        self.stream.zero_device(&mut self.sequences)?;
        self.stream.zero_device(&mut self.sequence_lengths)?;
        self.stream.zero_device(&mut self.windows)?;

        tracing::debug!(batch_id = %self.id, "Reset batch");
        Ok(())
    }
}
