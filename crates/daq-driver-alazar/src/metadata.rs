//! Record header and footer decoding.
//!
//! Both blocks are 16 bytes. Fields are extracted with explicit shifts and
//! masks over little-endian words; the bit positions below are the wire
//! contract with the board firmware.
//!
//! Header (four 32-bit words):
//!
//! | word | bits   | field                     |
//! |------|--------|---------------------------|
//! | 0    | 0..18  | serial number             |
//! | 0    | 18..22 | system number             |
//! | 0    | 22     | channel flag              |
//! | 0    | 23..27 | board number              |
//! | 0    | 27..30 | sample resolution         |
//! | 0    | 30..32 | data format               |
//! | 1    | 0..24  | record number             |
//! | 1    | 24..32 | board type                |
//! | 2    | 0..32  | timestamp, low 32 bits    |
//! | 3    | 0..8   | timestamp, high 8 bits    |
//! | 3    | 8..10  | clock source              |
//! | 3    | 10     | clock edge                |
//! | 3    | 11..18 | sample rate code          |
//! | 3    | 18..23 | input range code          |
//! | 3    | 23..25 | coupling                  |
//! | 3    | 25..27 | impedance                 |
//! | 3    | 27..32 | trigger and timeout flags |
//!
//! Footer (eight 16-bit words, logical order): aux/pulsar, timestamp
//! low/med/high, record number low/high, frame count low, frame count high
//! and type. In interleaved layout the board stores the footer words in the
//! order `[0, 2, 4, 6, 1, 3, 5, 7]`; [`RecordFooter::from_storage`] undoes
//! that permutation.

use tracing::trace;

use crate::codes::{ClockEdge, Coupling, Impedance, InputRange, SampleRate};
use crate::error::{AlazarError, Result};
use crate::geometry::{AcquisitionGeometry, MetadataKind, METADATA_BLOCK_BYTES};

mod header {
    pub const SERIAL_MASK: u32 = 0x3_FFFF;
    pub const SYSTEM_SHIFT: u32 = 18;
    pub const SYSTEM_MASK: u32 = 0xF;
    pub const CHANNEL_SHIFT: u32 = 22;
    pub const BOARD_SHIFT: u32 = 23;
    pub const BOARD_MASK: u32 = 0xF;
    pub const RESOLUTION_SHIFT: u32 = 27;
    pub const RESOLUTION_MASK: u32 = 0x7;
    pub const FORMAT_SHIFT: u32 = 30;
    pub const FORMAT_MASK: u32 = 0x3;

    pub const RECORD_NUMBER_MASK: u32 = 0xFF_FFFF;
    pub const BOARD_TYPE_SHIFT: u32 = 24;
    pub const BOARD_TYPE_MASK: u32 = 0xFF;

    pub const TS_HIGH_MASK: u32 = 0xFF;
    pub const CLOCK_SOURCE_SHIFT: u32 = 8;
    pub const CLOCK_SOURCE_MASK: u32 = 0x3;
    pub const CLOCK_EDGE_SHIFT: u32 = 10;
    pub const SAMPLE_RATE_SHIFT: u32 = 11;
    pub const SAMPLE_RATE_MASK: u32 = 0x7F;
    pub const INPUT_RANGE_SHIFT: u32 = 18;
    pub const INPUT_RANGE_MASK: u32 = 0x1F;
    pub const COUPLING_SHIFT: u32 = 23;
    pub const COUPLING_MASK: u32 = 0x3;
    pub const IMPEDANCE_SHIFT: u32 = 25;
    pub const IMPEDANCE_MASK: u32 = 0x3;
    pub const EXTERNAL_TRIGGERED_SHIFT: u32 = 27;
    pub const CHANNEL_B_TRIGGERED_SHIFT: u32 = 28;
    pub const CHANNEL_A_TRIGGERED_SHIFT: u32 = 29;
    pub const TIMEOUT_SHIFT: u32 = 30;
    pub const THIS_CHANNEL_TRIGGERED_SHIFT: u32 = 31;
}

/// Storage position of each logical footer word in interleaved layout.
pub const INTERLEAVED_FOOTER_ORDER: [usize; 8] = [0, 2, 4, 6, 1, 3, 5, 7];

#[inline]
fn field(word: u32, shift: u32, mask: u32) -> u32 {
    (word >> shift) & mask
}

#[inline]
fn bit(word: u32, shift: u32) -> bool {
    (word >> shift) & 1 != 0
}

#[inline]
fn set_field(word: &mut u32, shift: u32, mask: u32, value: u32) {
    *word = (*word & !(mask << shift)) | ((value & mask) << shift);
}

/// Decoded 16-byte record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordHeader {
    words: [u32; 4],
}

impl RecordHeader {
    /// Header from its four raw words.
    #[must_use]
    pub const fn from_words(words: [u32; 4]) -> Self {
        Self { words }
    }

    /// Header from 16 little-endian bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; METADATA_BLOCK_BYTES]) -> Self {
        let mut words = [0u32; 4];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self { words }
    }

    /// Raw words.
    #[must_use]
    pub fn words(&self) -> [u32; 4] {
        self.words
    }

    /// Encode as 16 little-endian bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; METADATA_BLOCK_BYTES] {
        let mut bytes = [0u8; METADATA_BLOCK_BYTES];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(self.words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// Board serial number.
    #[must_use]
    pub fn serial_number(&self) -> u32 {
        self.words[0] & header::SERIAL_MASK
    }

    /// System number of the board.
    #[must_use]
    pub fn system_number(&self) -> u32 {
        field(self.words[0], header::SYSTEM_SHIFT, header::SYSTEM_MASK)
    }

    /// Channel flag: false for the first block of a pair, true for the second.
    #[must_use]
    pub fn which_channel(&self) -> bool {
        bit(self.words[0], header::CHANNEL_SHIFT)
    }

    /// Board number within the system.
    #[must_use]
    pub fn board_number(&self) -> u32 {
        field(self.words[0], header::BOARD_SHIFT, header::BOARD_MASK)
    }

    /// Sample resolution code.
    #[must_use]
    pub fn sample_resolution(&self) -> u32 {
        field(self.words[0], header::RESOLUTION_SHIFT, header::RESOLUTION_MASK)
    }

    /// Data format code.
    #[must_use]
    pub fn data_format(&self) -> u32 {
        field(self.words[0], header::FORMAT_SHIFT, header::FORMAT_MASK)
    }

    /// Record number (24 bits).
    #[must_use]
    pub fn record_number(&self) -> u32 {
        self.words[1] & header::RECORD_NUMBER_MASK
    }

    /// Board type code.
    #[must_use]
    pub fn board_type(&self) -> u32 {
        field(self.words[1], header::BOARD_TYPE_SHIFT, header::BOARD_TYPE_MASK)
    }

    /// 40-bit trigger timestamp in timestamp clock ticks.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        let high = u64::from(self.words[3] & header::TS_HIGH_MASK);
        u64::from(self.words[2]) | (high << 32)
    }

    /// Clock source code.
    #[must_use]
    pub fn clock_source(&self) -> u32 {
        field(self.words[3], header::CLOCK_SOURCE_SHIFT, header::CLOCK_SOURCE_MASK)
    }

    /// Sample clock edge.
    #[must_use]
    pub fn clock_edge(&self) -> ClockEdge {
        if bit(self.words[3], header::CLOCK_EDGE_SHIFT) {
            ClockEdge::Falling
        } else {
            ClockEdge::Rising
        }
    }

    /// Raw sample rate code.
    #[must_use]
    pub fn sample_rate_code(&self) -> u32 {
        field(self.words[3], header::SAMPLE_RATE_SHIFT, header::SAMPLE_RATE_MASK)
    }

    /// Sample rate, if the code is known.
    #[must_use]
    pub fn sample_rate(&self) -> Option<SampleRate> {
        SampleRate::from_code(self.sample_rate_code())
    }

    /// Raw input range code.
    #[must_use]
    pub fn input_range_code(&self) -> u32 {
        field(self.words[3], header::INPUT_RANGE_SHIFT, header::INPUT_RANGE_MASK)
    }

    /// Input range, if the code is known.
    #[must_use]
    pub fn input_range(&self) -> Option<InputRange> {
        InputRange::from_code(self.input_range_code())
    }

    /// Input coupling, if the code is known.
    #[must_use]
    pub fn coupling(&self) -> Option<Coupling> {
        Coupling::from_code(field(
            self.words[3],
            header::COUPLING_SHIFT,
            header::COUPLING_MASK,
        ))
    }

    /// Input impedance, if the code is known.
    #[must_use]
    pub fn impedance(&self) -> Option<Impedance> {
        Impedance::from_code(field(
            self.words[3],
            header::IMPEDANCE_SHIFT,
            header::IMPEDANCE_MASK,
        ))
    }

    /// The external trigger input caused the trigger.
    #[must_use]
    pub fn external_triggered(&self) -> bool {
        bit(self.words[3], header::EXTERNAL_TRIGGERED_SHIFT)
    }

    /// Channel B caused the trigger.
    #[must_use]
    pub fn channel_b_triggered(&self) -> bool {
        bit(self.words[3], header::CHANNEL_B_TRIGGERED_SHIFT)
    }

    /// Channel A caused the trigger.
    #[must_use]
    pub fn channel_a_triggered(&self) -> bool {
        bit(self.words[3], header::CHANNEL_A_TRIGGERED_SHIFT)
    }

    /// The trigger timeout fired instead of a trigger event.
    #[must_use]
    pub fn timeout_occurred(&self) -> bool {
        bit(self.words[3], header::TIMEOUT_SHIFT)
    }

    /// This channel caused the trigger.
    #[must_use]
    pub fn this_channel_triggered(&self) -> bool {
        bit(self.words[3], header::THIS_CHANNEL_TRIGGERED_SHIFT)
    }

    /// Set the record number (truncated to 24 bits).
    #[must_use]
    pub fn with_record_number(mut self, record_number: u32) -> Self {
        set_field(&mut self.words[1], 0, header::RECORD_NUMBER_MASK, record_number);
        self
    }

    /// Set the board type code.
    #[must_use]
    pub fn with_board_type(mut self, board_type: u32) -> Self {
        set_field(
            &mut self.words[1],
            header::BOARD_TYPE_SHIFT,
            header::BOARD_TYPE_MASK,
            board_type,
        );
        self
    }

    /// Set the timestamp (truncated to 40 bits).
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.words[2] = timestamp as u32;
        set_field(&mut self.words[3], 0, header::TS_HIGH_MASK, (timestamp >> 32) as u32);
        self
    }

    /// Set the channel flag.
    #[must_use]
    pub fn with_which_channel(mut self, second: bool) -> Self {
        set_field(&mut self.words[0], header::CHANNEL_SHIFT, 1, u32::from(second));
        self
    }

    /// Set the serial number (truncated to 18 bits).
    #[must_use]
    pub fn with_serial_number(mut self, serial: u32) -> Self {
        set_field(&mut self.words[0], 0, header::SERIAL_MASK, serial);
        self
    }

    /// Set the sample rate code.
    #[must_use]
    pub fn with_sample_rate(mut self, rate: SampleRate) -> Self {
        set_field(
            &mut self.words[3],
            header::SAMPLE_RATE_SHIFT,
            header::SAMPLE_RATE_MASK,
            rate.code(),
        );
        self
    }
}

/// Decoded 16-byte record footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordFooter {
    words: [u16; 8],
}

impl RecordFooter {
    /// Footer from its eight words in logical field order.
    #[must_use]
    pub const fn from_words(words: [u16; 8]) -> Self {
        Self { words }
    }

    /// Footer from 16 stored bytes.
    ///
    /// When `interleaved` is set the stored words are permuted by
    /// [`INTERLEAVED_FOOTER_ORDER`] and are put back in logical order here.
    #[must_use]
    pub fn from_storage(bytes: &[u8; METADATA_BLOCK_BYTES], interleaved: bool) -> Self {
        let mut stored = [0u16; 8];
        for (word, chunk) in stored.iter_mut().zip(bytes.chunks_exact(2)) {
            *word = u16::from_le_bytes([chunk[0], chunk[1]]);
        }
        let words = if interleaved {
            INTERLEAVED_FOOTER_ORDER.map(|i| stored[i])
        } else {
            stored
        };
        Self { words }
    }

    /// Encode as 16 stored bytes, applying the interleaved permutation when
    /// requested.
    #[must_use]
    pub fn to_storage(&self, interleaved: bool) -> [u8; METADATA_BLOCK_BYTES] {
        let mut stored = self.words;
        if interleaved {
            for (logical, &position) in INTERLEAVED_FOOTER_ORDER.iter().enumerate() {
                stored[position] = self.words[logical];
            }
        }
        let mut bytes = [0u8; METADATA_BLOCK_BYTES];
        for (chunk, word) in bytes.chunks_exact_mut(2).zip(stored) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// Raw words in logical order.
    #[must_use]
    pub fn words(&self) -> [u16; 8] {
        self.words
    }

    /// AUX input level and low pulsar bits.
    #[must_use]
    pub fn aux_and_pulsar_low(&self) -> u8 {
        self.words[0] as u8
    }

    /// High pulsar bits.
    #[must_use]
    pub fn pulsar_high(&self) -> u8 {
        (self.words[0] >> 8) as u8
    }

    /// 48-bit trigger timestamp.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        u64::from(self.words[1]) | (u64::from(self.words[2]) << 16) | (u64::from(self.words[3]) << 32)
    }

    /// 32-bit record number.
    #[must_use]
    pub fn record_number(&self) -> u32 {
        u32::from(self.words[4]) | (u32::from(self.words[5]) << 16)
    }

    /// 24-bit frame count.
    #[must_use]
    pub fn frame_count(&self) -> u32 {
        u32::from(self.words[6]) | (u32::from(self.words[7] & 0xFF) << 16)
    }

    /// Footer type byte.
    #[must_use]
    pub fn footer_type(&self) -> u8 {
        (self.words[7] >> 8) as u8
    }

    /// Set the timestamp (truncated to 48 bits).
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.words[1] = timestamp as u16;
        self.words[2] = (timestamp >> 16) as u16;
        self.words[3] = (timestamp >> 32) as u16;
        self
    }

    /// Set the record number.
    #[must_use]
    pub fn with_record_number(mut self, record_number: u32) -> Self {
        self.words[4] = record_number as u16;
        self.words[5] = (record_number >> 16) as u16;
        self
    }

    /// Set the frame count (truncated to 24 bits).
    #[must_use]
    pub fn with_frame_count(mut self, frame_count: u32) -> Self {
        self.words[6] = frame_count as u16;
        self.words[7] = (self.words[7] & 0xFF00) | ((frame_count >> 16) & 0xFF) as u16;
        self
    }
}

fn read_block(
    bytes: &[u8],
    geometry: &AcquisitionGeometry,
    record: usize,
    block: usize,
) -> Result<[u8; METADATA_BLOCK_BYTES]> {
    let offset = geometry.metadata_block_offset(record, block).ok_or_else(|| {
        AlazarError::layout(format!(
            "No metadata block {block} in record {record} (multiplicity {})",
            geometry.metadata_multiplicity()
        ))
    })?;
    let mut out = [0u8; METADATA_BLOCK_BYTES];
    out.copy_from_slice(&bytes[offset..offset + METADATA_BLOCK_BYTES]);
    Ok(out)
}

/// Decode the channel-0 header of every record.
///
/// Returns `Ok(None)` when the geometry carries no headers.
pub fn decode_headers(
    bytes: &[u8],
    geometry: &AcquisitionGeometry,
) -> Result<Option<Vec<RecordHeader>>> {
    if geometry.metadata() != MetadataKind::Header {
        return Ok(None);
    }
    decode_header_block(bytes, geometry, 0).map(Some)
}

/// Decode header block `block` (the channel index in planar layout, the
/// block within the pair in interleaved layout) of every record.
pub fn decode_header_block(
    bytes: &[u8],
    geometry: &AcquisitionGeometry,
    block: usize,
) -> Result<Vec<RecordHeader>> {
    if geometry.metadata() != MetadataKind::Header {
        return Err(AlazarError::layout("Geometry carries no record headers"));
    }
    geometry.check_buffer_len(bytes.len())?;
    let headers = (0..geometry.records_per_buffer())
        .map(|record| read_block(bytes, geometry, record, block).map(|b| RecordHeader::from_bytes(&b)))
        .collect::<Result<Vec<_>>>()?;
    trace!(records = headers.len(), block, "Decoded record headers");
    Ok(headers)
}

/// Decode the footer at the end of every record.
///
/// Returns `Ok(None)` when the geometry carries no footers.
pub fn decode_footers(
    bytes: &[u8],
    geometry: &AcquisitionGeometry,
) -> Result<Option<Vec<RecordFooter>>> {
    if geometry.metadata() != MetadataKind::Footer {
        return Ok(None);
    }
    let last = geometry.metadata_multiplicity() - 1;
    decode_footer_block(bytes, geometry, last).map(Some)
}

/// Decode footer block `block` of every record.
pub fn decode_footer_block(
    bytes: &[u8],
    geometry: &AcquisitionGeometry,
    block: usize,
) -> Result<Vec<RecordFooter>> {
    if geometry.metadata() != MetadataKind::Footer {
        return Err(AlazarError::layout("Geometry carries no record footers"));
    }
    geometry.check_buffer_len(bytes.len())?;
    let interleaved = geometry.interleaved();
    let footers = (0..geometry.records_per_buffer())
        .map(|record| {
            read_block(bytes, geometry, record, block)
                .map(|b| RecordFooter::from_storage(&b, interleaved))
        })
        .collect::<Result<Vec<_>>>()?;
    trace!(records = footers.len(), block, interleaved, "Decoded record footers");
    Ok(footers)
}
