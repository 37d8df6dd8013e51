//! Sequence packing into the host staging buffers

use super::Batch;
use crate::error::{PoaError, Result};
use crate::window::WindowDetails;

impl Batch {
    /// Open a new window starting at the current cursors.
    ///
    /// Returns the window's index, or `CapacityExceeded` once `max_poas`
    /// windows are open (the batch is left unchanged).
    pub fn add_window(&mut self) -> Result<usize> {
        if self.window_count == self.config.max_poas {
            return Err(PoaError::CapacityExceeded {
                max_poas: self.config.max_poas,
            });
        }

        let window = WindowDetails::new(self.total_sequences as u32, self.total_nucleotides as u32);
        self.host_windows.as_mut_slice()?[self.window_count] = window;
        self.window_count += 1;

        Ok(self.window_count - 1)
    }

    /// Append a read to the most recently opened window.
    ///
    /// The read must be shorter than `max_sequence_size`, and a window holds
    /// at most `max_sequences_per_poa - 1` reads. A rejected read leaves the
    /// batch unchanged.
    ///
    /// # Panics
    ///
    /// If no window has been opened in the current cycle.
    pub fn add_sequence(&mut self, sequence: &[u8]) -> Result<()> {
        assert!(
            self.window_count > 0,
            "add_sequence called on batch {} before add_window",
            self.id
        );

        let max = self.config.limits.max_sequence_size;
        if sequence.len() >= max {
            return Err(PoaError::SequenceTooLong {
                len: sequence.len(),
                max,
            });
        }

        let windows = self.host_windows.as_mut_slice()?;
        let window = &mut windows[self.window_count - 1];
        if window.seq_count as usize + 1 >= self.config.max_sequences_per_poa {
            return Err(PoaError::TooManySequences {
                max: self.config.max_sequences_per_poa,
            });
        }

        let start = self.total_nucleotides;
        self.host_sequences.as_mut_slice()?[start..start + sequence.len()]
            .copy_from_slice(sequence);
        self.host_sequence_lengths.as_mut_slice()?[self.total_sequences] = sequence.len() as u16;

        window.seq_count += 1;
        self.total_nucleotides += sequence.len();
        self.total_sequences += 1;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{BatchConfig, GraphLimits};
    use crate::error::PoaError;
    use crate::Batch;

    fn small_batch(max_poas: usize, max_sequences: usize) -> Batch {
        let limits = GraphLimits {
            max_sequence_size: 32,
            max_nodes_per_window: 64,
            max_node_edges: 4,
            max_node_alignments: 4,
            threads_per_block: 32,
        };
        Batch::new(BatchConfig::new(max_poas, max_sequences).with_limits(limits)).unwrap()
    }

    #[test]
    fn test_windows_record_cursors() {
        let mut batch = small_batch(3, 4);

        assert_eq!(batch.add_window().unwrap(), 0);
        batch.add_sequence(b"ACG").unwrap();
        batch.add_sequence(b"AC").unwrap();
        assert_eq!(batch.add_window().unwrap(), 1);
        batch.add_sequence(b"T").unwrap();

        let windows = batch.host_windows.as_slice().unwrap();
        assert_eq!((windows[0].seq_len_offset, windows[0].nucleotide_offset), (0, 0));
        assert_eq!(windows[0].seq_count, 2);
        assert_eq!((windows[1].seq_len_offset, windows[1].nucleotide_offset), (2, 5));
        assert_eq!(windows[1].seq_count, 1);

        assert_eq!(&batch.host_sequences.as_slice().unwrap()[..6], b"ACGACT");
        assert_eq!(&batch.host_sequence_lengths.as_slice().unwrap()[..3], &[3, 2, 1]);
    }

    #[test]
    fn test_longest_accepted_sequence() {
        let mut batch = small_batch(1, 4);
        batch.add_window().unwrap();

        assert!(batch.add_sequence(&[b'A'; 31]).is_ok());
        let err = batch.add_sequence(&[b'A'; 32]).unwrap_err();
        assert!(matches!(err, PoaError::SequenceTooLong { len: 32, max: 32 }));
        assert_eq!(batch.total_nucleotides(), 31);
    }

    #[test]
    fn test_rejected_sequences_write_nothing() {
        let mut batch = small_batch(2, 3);
        batch.add_window().unwrap();
        batch.add_sequence(b"ACGT").unwrap();
        batch.add_sequence(b"ACGA").unwrap();

        let sequences = batch.host_sequences.as_slice().unwrap().to_vec();
        let lengths = batch.host_sequence_lengths.as_slice().unwrap().to_vec();
        let windows = batch.host_windows.as_slice().unwrap().to_vec();

        let err = batch.add_sequence(&[b'G'; 32]).unwrap_err();
        assert!(matches!(err, PoaError::SequenceTooLong { .. }));
        let err = batch.add_sequence(b"TTTT").unwrap_err();
        assert!(matches!(err, PoaError::TooManySequences { max: 3 }));

        assert_eq!(batch.host_sequences.as_slice().unwrap(), &sequences[..]);
        assert_eq!(batch.host_sequence_lengths.as_slice().unwrap(), &lengths[..]);
        assert_eq!(batch.host_windows.as_slice().unwrap(), &windows[..]);
        assert_eq!(batch.host_windows.as_slice().unwrap()[0].seq_count, 2);
        assert_eq!(batch.total_sequences(), 2);
        assert_eq!(batch.total_nucleotides(), 8);
    }

    #[test]
    fn test_empty_sequence_is_accepted() {
        let mut batch = small_batch(1, 4);
        batch.add_window().unwrap();
        batch.add_sequence(b"").unwrap();

        assert_eq!(batch.total_sequences(), 1);
        assert_eq!(batch.total_nucleotides(), 0);
    }

    #[test]
    #[should_panic(expected = "before add_window")]
    fn test_sequence_without_window_panics() {
        let mut batch = small_batch(1, 4);
        let _ = batch.add_sequence(b"ACGT");
    }
}
