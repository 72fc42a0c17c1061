//! AutoDMA data plane for AlazarTech digitizers.
//!
//! This crate sizes, owns and decodes the DMA buffers an AlazarTech board
//! fills during an AutoDMA acquisition. Board configuration (clock, inputs,
//! trigger) is left to the caller; this crate starts where buffers are
//! allocated and ends where samples and record metadata come out as typed
//! values.
//!
//! # Architecture
//!
//! ## Layout
//! - [`AcquisitionGeometry`] - Validated byte layout of one buffer
//! - [`SampleWidth`] / [`LayoutStrategy`] - How samples and metadata are stored
//! - [`extract_samples`] / [`unpack_12bit`] - Sample decoding
//! - [`RecordHeader`] / [`RecordFooter`] - 16-byte record metadata
//!
//! ## Buffers
//! - [`DmaBuffer`] - Driver-allocated region with RAII release
//! - [`Acquisition`] - Round-robin ring of posted buffers
//! - [`CompletedBuffer`] / [`RawBatch`] - Access to completed data
//!
//! ## Drivers
//! - [`DmaDriver`] / [`BoardQuery`] - Seams to the board
//! - [`MockDigitizer`] - In-memory board for tests and offline use
//! - `AtsBoard` - ATSApi board (feature `hardware`)
//!
//! ## Ambient
//! - [`AcquisitionConfig`] - figment-loaded session configuration
//! - [`logging`] - tracing subscriber setup
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use daq_driver_alazar::{Acquisition, AcquisitionConfig, AdmaMode, MockDigitizer};
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = AcquisitionConfig {
//!     channels: vec!["A".into(), "B".into()],
//!     samples_per_record: 512,
//!     records_per_buffer: 4,
//!     buffers_per_acquisition: 8,
//!     mode: AdmaMode::Npt,
//!     record_footers: true,
//!     ..AcquisitionConfig::default()
//! };
//! config.validate()?;
//!
//! let board = Arc::new(MockDigitizer::new());
//! let geometry = config.geometry_for(board.as_ref())?;
//! board.set_geometry(geometry);
//!
//! let mut acquisition = Acquisition::new(board, geometry, config.buffer_count)?
//!     .with_buffer_limit(config.buffers_per_acquisition);
//! let mut records = 0;
//! acquisition.run(Duration::from_secs(1), |buffer| {
//!     let footers = buffer.footers()?.unwrap_or_default();
//!     records += footers.len();
//!     Ok(())
//! })?;
//! assert_eq!(records, 32);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod acquisition;
#[cfg(feature = "hardware")]
pub mod board;
pub mod buffer;
pub mod codes;
pub mod config;
pub mod driver;
pub mod error;
pub mod flags;
pub mod geometry;
pub mod layout;
pub mod logging;
pub mod metadata;
pub mod mock;

pub use acquisition::{
    Acquisition, AcquisitionState, AcquisitionStats, CompletedBuffer, RawBatch,
};
#[cfg(feature = "hardware")]
pub use board::AtsBoard;
pub use buffer::{DmaBuffer, Elements};
pub use codes::{Capability, ClockEdge, Coupling, Impedance, InputRange, Parameter, SampleRate};
pub use config::AcquisitionConfig;
pub use driver::{
    BoardQuery, ChannelInfo, DmaDriver, ElementWidth, GeometryInputs, DEFAULT_WAIT_TIMEOUT,
};
pub use error::{AlazarError, Result};
pub use flags::{AdmaFlags, AdmaMode, Channels, PackMode};
pub use geometry::{
    AcquisitionGeometry, GeometryBuilder, GeometryParams, LayoutStrategy, MetadataKind,
    SampleWidth, METADATA_BLOCK_BYTES,
};
pub use layout::{extract_samples, extract_samples_native, pack_12bit, unpack_12bit};
pub use logging::{LogFormat, LoggingConfig};
pub use metadata::{
    decode_footer_block, decode_footers, decode_header_block, decode_headers, RecordFooter,
    RecordHeader,
};
pub use mock::{MockConfig, MockDigitizer, MockStats};
