//! Buffer geometry: how many bytes a DMA buffer needs and where things live.
//!
//! A buffer holds `records_per_buffer` records back to back. Each record
//! carries `channels × samples_per_record` samples plus an optional 16-byte
//! metadata block (header or footer) per channel in planar layout, or per
//! record half (at most two blocks) in interleaved layout:
//!
//! ```text
//! stride = channels × bytes_per_sample × samples_per_record
//!        + 16 × (interleaved ? min(channels, 2) : channels)
//! total  = records_per_buffer × stride
//! ```
//!
//! Invalid combinations are rejected here, before any memory is allocated,
//! so decoders never see a contradictory geometry.
//!
//! # Example
//!
//! ```
//! use daq_driver_alazar::AcquisitionGeometry;
//!
//! # fn example() -> daq_driver_alazar::Result<()> {
//! let geometry = AcquisitionGeometry::builder()
//!     .channels(2)
//!     .samples_per_record(1024)
//!     .records_per_buffer(10)
//!     .native_bits_per_sample(16)
//!     .record_headers(true)
//!     .build()?;
//!
//! assert_eq!(geometry.record_stride(), 2 * 2 * 1024 + 2 * 16);
//! assert_eq!(geometry.total_bytes(), 10 * geometry.record_stride());
//! # Ok(())
//! # }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::driver::ElementWidth;
use crate::error::{AlazarError, Result};
use crate::flags::{Channels, PackMode};

/// Size in bytes of one record header or footer block.
pub const METADATA_BLOCK_BYTES: usize = 16;

/// Storage width of one sample.
///
/// 12-bit packed samples occupy one and a half bytes. The width is kept as
/// an exact ratio so byte counts never truncate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleWidth {
    /// One byte per sample.
    Bits8,
    /// Two samples in three bytes.
    Packed12,
    /// Two bytes per sample.
    Bits16,
}

impl SampleWidth {
    /// Resolve the on-wire width from the packing mode and the board's native
    /// bits per sample.
    pub fn resolve(pack_mode: PackMode, native_bits_per_sample: u32) -> Result<Self> {
        match pack_mode {
            PackMode::Bits8 => Ok(Self::Bits8),
            PackMode::Bits12 => Ok(Self::Packed12),
            PackMode::None => match native_bits_per_sample.div_ceil(8) {
                1 => Ok(Self::Bits8),
                2 => Ok(Self::Bits16),
                _ => Err(AlazarError::config(format!(
                    "Unsupported native sample width of {native_bits_per_sample} bits"
                ))),
            },
        }
    }

    /// Bytes per sample as `(numerator, denominator)`.
    #[must_use]
    pub const fn ratio(self) -> (usize, usize) {
        match self {
            Self::Bits8 => (1, 1),
            Self::Packed12 => (3, 2),
            Self::Bits16 => (2, 1),
        }
    }

    /// Bytes per sample as a float, for display and throughput estimates.
    #[must_use]
    pub fn bytes_per_sample(self) -> f64 {
        let (num, den) = self.ratio();
        num as f64 / den as f64
    }

    /// Exact byte count for `samples` samples.
    ///
    /// Returns `None` on overflow or when the count is not a whole number of
    /// bytes (an odd number of 12-bit samples).
    #[must_use]
    pub fn bytes_for(self, samples: usize) -> Option<usize> {
        let (num, den) = self.ratio();
        let scaled = samples.checked_mul(num)?;
        (scaled % den == 0).then_some(scaled / den)
    }

    /// Significant bits per decoded sample.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Bits8 => 8,
            Self::Packed12 => 12,
            Self::Bits16 => 16,
        }
    }

    /// Storage element used for allocation and flat access.
    #[must_use]
    pub const fn element_width(self) -> ElementWidth {
        match self {
            Self::Bits8 | Self::Packed12 => ElementWidth::U8,
            Self::Bits16 => ElementWidth::U16,
        }
    }
}

impl fmt::Display for SampleWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bits8 => write!(f, "8-bit"),
            Self::Packed12 => write!(f, "12-bit packed"),
            Self::Bits16 => write!(f, "16-bit"),
        }
    }
}

/// Which metadata block, if any, each record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKind {
    /// No metadata.
    #[default]
    None,
    /// 16-byte header before the samples.
    Header,
    /// 16-byte footer after the samples.
    Footer,
}

/// Decode strategy selected for a validated geometry.
///
/// Only legal combinations are representable: footers never appear with
/// 12-bit packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutStrategy {
    /// One contiguous run per channel, each with its own metadata block.
    Planar {
        /// Metadata carried by each channel run.
        metadata: MetadataKind,
    },
    /// Timepoint-major samples with up to two metadata blocks per record.
    Interleaved {
        /// Metadata carried by the record.
        metadata: MetadataKind,
    },
    /// Interleaved 12-bit samples packed two per three bytes.
    InterleavedPacked12 {
        /// Whether the record starts with header blocks.
        header: bool,
    },
}

impl LayoutStrategy {
    /// Metadata kind of this strategy.
    #[must_use]
    pub fn metadata(self) -> MetadataKind {
        match self {
            Self::Planar { metadata } | Self::Interleaved { metadata } => metadata,
            Self::InterleavedPacked12 { header: true } => MetadataKind::Header,
            Self::InterleavedPacked12 { header: false } => MetadataKind::None,
        }
    }

    /// Whether samples are stored timepoint-major.
    #[must_use]
    pub fn is_interleaved(self) -> bool {
        !matches!(self, Self::Planar { .. })
    }
}

/// Inputs to the geometry calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryParams {
    /// Number of active channels.
    pub channels: usize,
    /// Samples per channel in each record.
    pub samples_per_record: usize,
    /// Records in each DMA buffer.
    pub records_per_buffer: usize,
    /// Packing mode configured on the board.
    pub pack_mode: PackMode,
    /// Native bits per sample reported by the board.
    pub native_bits_per_sample: u32,
    /// Prefix records with headers.
    pub record_headers: bool,
    /// Suffix records with footers.
    pub record_footers: bool,
    /// Store samples timepoint-major.
    pub interleaved: bool,
}

impl Default for GeometryParams {
    fn default() -> Self {
        Self {
            channels: 1,
            samples_per_record: 1024,
            records_per_buffer: 1,
            pack_mode: PackMode::None,
            native_bits_per_sample: 16,
            record_headers: false,
            record_footers: false,
            interleaved: false,
        }
    }
}

/// Validated, immutable byte layout of one DMA buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionGeometry {
    channels: usize,
    samples_per_record: usize,
    records_per_buffer: usize,
    sample_width: SampleWidth,
    strategy: LayoutStrategy,
    record_stride: usize,
    total_bytes: usize,
}

impl AcquisitionGeometry {
    /// Create a new builder for buffer geometry.
    #[must_use]
    pub fn builder() -> GeometryBuilder {
        GeometryBuilder::default()
    }

    /// Validate `params` and compute the buffer layout.
    ///
    /// # Errors
    ///
    /// [`AlazarError::Configuration`] when headers and footers are both
    /// requested, 12-bit packing is used without interleaving, footers are
    /// combined with a packing mode, any count is zero, more than 16 channels
    /// are requested, or the buffer does not fit in a 32-bit transfer length.
    pub fn compute(params: &GeometryParams) -> Result<Self> {
        if params.record_headers && params.record_footers {
            return Err(AlazarError::config(
                "Record headers and record footers are mutually exclusive",
            ));
        }
        if params.pack_mode == PackMode::Bits12 && !params.interleaved {
            return Err(AlazarError::config(
                "12-bit packing requires interleaved samples",
            ));
        }
        if params.record_footers && params.pack_mode.is_packed() {
            return Err(AlazarError::config(format!(
                "Record footers are not supported with {} packing",
                params.pack_mode
            )));
        }
        if params.channels == 0 || params.channels > Channels::MAX {
            return Err(AlazarError::config(format!(
                "Channel count must be between 1 and {}, got {}",
                Channels::MAX,
                params.channels
            )));
        }
        if params.samples_per_record == 0 {
            return Err(AlazarError::config("Samples per record must be greater than 0"));
        }
        if params.records_per_buffer == 0 {
            return Err(AlazarError::config("Records per buffer must be greater than 0"));
        }

        let sample_width = SampleWidth::resolve(params.pack_mode, params.native_bits_per_sample)?;

        let metadata = if params.record_headers {
            MetadataKind::Header
        } else if params.record_footers {
            MetadataKind::Footer
        } else {
            MetadataKind::None
        };
        let strategy = match (sample_width, params.interleaved) {
            (SampleWidth::Packed12, _) => LayoutStrategy::InterleavedPacked12 {
                header: metadata == MetadataKind::Header,
            },
            (_, true) => LayoutStrategy::Interleaved { metadata },
            (_, false) => LayoutStrategy::Planar { metadata },
        };

        let overflow = || AlazarError::config("Buffer size overflows");
        let samples = params
            .channels
            .checked_mul(params.samples_per_record)
            .ok_or_else(overflow)?;
        let sample_bytes = sample_width.bytes_for(samples).ok_or_else(|| {
            AlazarError::config(format!(
                "{samples} samples of {sample_width} data is not a whole number of bytes"
            ))
        })?;
        let metadata_bytes = if metadata == MetadataKind::None {
            0
        } else {
            METADATA_BLOCK_BYTES * metadata_multiplicity(params.channels, params.interleaved)
        };
        let record_stride = sample_bytes.checked_add(metadata_bytes).ok_or_else(overflow)?;
        let total_bytes = record_stride
            .checked_mul(params.records_per_buffer)
            .ok_or_else(overflow)?;
        if total_bytes > u32::MAX as usize {
            return Err(AlazarError::config(format!(
                "Buffer of {total_bytes} bytes exceeds the 32-bit transfer length"
            )));
        }

        Ok(Self {
            channels: params.channels,
            samples_per_record: params.samples_per_record,
            records_per_buffer: params.records_per_buffer,
            sample_width,
            strategy,
            record_stride,
            total_bytes,
        })
    }

    /// Number of active channels.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Samples per channel in each record.
    #[must_use]
    pub fn samples_per_record(&self) -> usize {
        self.samples_per_record
    }

    /// Records in each buffer.
    #[must_use]
    pub fn records_per_buffer(&self) -> usize {
        self.records_per_buffer
    }

    /// On-wire sample width.
    #[must_use]
    pub fn sample_width(&self) -> SampleWidth {
        self.sample_width
    }

    /// Storage element width used for allocation.
    #[must_use]
    pub fn element_width(&self) -> ElementWidth {
        self.sample_width.element_width()
    }

    /// Selected decode strategy.
    #[must_use]
    pub fn strategy(&self) -> LayoutStrategy {
        self.strategy
    }

    /// Metadata carried by each record.
    #[must_use]
    pub fn metadata(&self) -> MetadataKind {
        self.strategy.metadata()
    }

    /// Whether samples are stored timepoint-major.
    #[must_use]
    pub fn interleaved(&self) -> bool {
        self.strategy.is_interleaved()
    }

    /// Header block size: 16 when headers are enabled, else 0.
    #[must_use]
    pub fn header_bytes(&self) -> usize {
        if self.metadata() == MetadataKind::Header {
            METADATA_BLOCK_BYTES
        } else {
            0
        }
    }

    /// Footer block size: 16 when footers are enabled, else 0.
    #[must_use]
    pub fn footer_bytes(&self) -> usize {
        if self.metadata() == MetadataKind::Footer {
            METADATA_BLOCK_BYTES
        } else {
            0
        }
    }

    /// Number of metadata blocks in each record.
    #[must_use]
    pub fn metadata_multiplicity(&self) -> usize {
        metadata_multiplicity(self.channels, self.interleaved())
    }

    /// Bytes of metadata in each record.
    #[must_use]
    pub fn metadata_bytes_per_record(&self) -> usize {
        (self.header_bytes() + self.footer_bytes()) * self.metadata_multiplicity()
    }

    /// Bytes of sample data in each record.
    #[must_use]
    pub fn sample_bytes_per_record(&self) -> usize {
        self.record_stride - self.metadata_bytes_per_record()
    }

    /// Bytes from the start of one record to the start of the next.
    #[must_use]
    pub fn record_stride(&self) -> usize {
        self.record_stride
    }

    /// Total buffer size in bytes.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Storage elements per record.
    #[must_use]
    pub fn elements_per_record(&self) -> usize {
        self.record_stride / self.element_width().bytes()
    }

    /// Storage elements in the whole buffer.
    #[must_use]
    pub fn total_elements(&self) -> usize {
        self.total_bytes / self.element_width().bytes()
    }

    /// Samples across all channels and records in one buffer.
    #[must_use]
    pub fn samples_per_buffer(&self) -> usize {
        self.records_per_buffer * self.channels * self.samples_per_record
    }

    /// Bytes of each per-channel run in planar layout.
    #[must_use]
    pub fn channel_run_bytes(&self) -> usize {
        self.record_stride / self.channels
    }

    /// Byte offset of metadata block `block` within record `record`.
    ///
    /// In planar layout block `b` belongs to channel `b`: headers open the
    /// channel run and footers close it. In interleaved layout the blocks sit
    /// together at the start (headers) or end (footers) of the record.
    /// Returns `None` when the record carries no metadata or either index is
    /// out of range.
    #[must_use]
    pub fn metadata_block_offset(&self, record: usize, block: usize) -> Option<usize> {
        if record >= self.records_per_buffer || block >= self.metadata_multiplicity() {
            return None;
        }
        let record_start = record * self.record_stride;
        let within = match (self.metadata(), self.interleaved()) {
            (MetadataKind::None, _) => return None,
            (MetadataKind::Header, false) => block * self.channel_run_bytes(),
            (MetadataKind::Footer, false) => {
                (block + 1) * self.channel_run_bytes() - METADATA_BLOCK_BYTES
            }
            (MetadataKind::Header, true) => block * METADATA_BLOCK_BYTES,
            (MetadataKind::Footer, true) => {
                self.sample_bytes_per_record() + block * METADATA_BLOCK_BYTES
            }
        };
        Some(record_start + within)
    }

    /// Check that a buffer of `len` bytes can hold this geometry.
    pub fn check_buffer_len(&self, len: usize) -> Result<()> {
        if len < self.total_bytes {
            return Err(AlazarError::layout(format!(
                "Buffer holds {len} bytes but the geometry needs {}",
                self.total_bytes
            )));
        }
        Ok(())
    }
}

impl fmt::Display for AcquisitionGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ch × {} samples × {} records, {}, {:?}, {} bytes",
            self.channels,
            self.samples_per_record,
            self.records_per_buffer,
            self.sample_width,
            self.strategy,
            self.total_bytes
        )
    }
}

fn metadata_multiplicity(channels: usize, interleaved: bool) -> usize {
    if interleaved {
        channels.min(2)
    } else {
        channels
    }
}

/// Builder for [`AcquisitionGeometry`].
#[derive(Debug, Default)]
pub struct GeometryBuilder {
    params: GeometryParams,
}

impl GeometryBuilder {
    /// Set the number of active channels.
    #[must_use]
    pub fn channels(mut self, channels: usize) -> Self {
        self.params.channels = channels;
        self
    }

    /// Set the samples per channel in each record.
    #[must_use]
    pub fn samples_per_record(mut self, samples: usize) -> Self {
        self.params.samples_per_record = samples;
        self
    }

    /// Set the records in each buffer.
    #[must_use]
    pub fn records_per_buffer(mut self, records: usize) -> Self {
        self.params.records_per_buffer = records;
        self
    }

    /// Set the packing mode.
    #[must_use]
    pub fn pack_mode(mut self, mode: PackMode) -> Self {
        self.params.pack_mode = mode;
        self
    }

    /// Set the board's native bits per sample.
    #[must_use]
    pub fn native_bits_per_sample(mut self, bits: u32) -> Self {
        self.params.native_bits_per_sample = bits;
        self
    }

    /// Enable record headers.
    #[must_use]
    pub fn record_headers(mut self, enabled: bool) -> Self {
        self.params.record_headers = enabled;
        self
    }

    /// Enable record footers.
    #[must_use]
    pub fn record_footers(mut self, enabled: bool) -> Self {
        self.params.record_footers = enabled;
        self
    }

    /// Store samples timepoint-major.
    #[must_use]
    pub fn interleaved(mut self, enabled: bool) -> Self {
        self.params.interleaved = enabled;
        self
    }

    /// Validate and compute the geometry.
    pub fn build(self) -> Result<AcquisitionGeometry> {
        AcquisitionGeometry::compute(&self.params)
    }
}
