//! Per-window metadata shared with the consensus kernel

/// Location of one window's reads inside the batch's flat buffers.
///
/// Layout matches the kernel-side struct: two `u32` offsets followed by the
/// `u16` read count, padded to 12 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowDetails {
    /// Index of the window's first entry in the sequence-length array
    pub seq_len_offset: u32,
    /// Byte offset of the window's first symbol in the nucleotide buffer
    pub nucleotide_offset: u32,
    /// Number of reads appended to the window
    pub seq_count: u16,
    _pad: u16,
}

#[cfg(feature = "cuda")]
unsafe impl cudarc::driver::DeviceRepr for WindowDetails {}
#[cfg(feature = "cuda")]
unsafe impl cudarc::driver::ValidAsZeroBits for WindowDetails {}

impl WindowDetails {
    /// Open an empty window starting at the given cursors
    pub fn new(seq_len_offset: u32, nucleotide_offset: u32) -> Self {
        Self {
            seq_len_offset,
            nucleotide_offset,
            seq_count: 0,
            _pad: 0,
        }
    }

    /// This window's entries of the batch-wide sequence-length array
    pub fn lengths<'a>(&self, sequence_lengths: &'a [u16]) -> &'a [u16] {
        let start = self.seq_len_offset as usize;
        &sequence_lengths[start..start + self.seq_count as usize]
    }

    /// Iterate this window's reads out of the flat nucleotide buffer
    pub fn reads<'a>(
        &self,
        nucleotides: &'a [u8],
        sequence_lengths: &'a [u16],
    ) -> impl Iterator<Item = &'a [u8]> + 'a {
        let mut cursor = self.nucleotide_offset as usize;
        self.lengths(sequence_lengths).iter().map(move |&len| {
            let read = &nucleotides[cursor..cursor + len as usize];
            cursor += len as usize;
            read
        })
    }
}
