//! In-memory digitizer for tests and offline development.
//!
//! `MockDigitizer` implements [`DmaDriver`] and [`BoardQuery`] without
//! hardware. It allocates real, aligned memory, tracks every allocation
//! with its element width, and keeps the posted buffers in a FIFO like the
//! board does. When a wait completes, the buffer is filled with synthetic
//! records encoded in the configured layout: samples from
//! [`expected_sample`], headers or footers carrying consecutive record
//! numbers and timestamps from [`expected_timestamp`].
//!
//! # Failure injection
//!
//! - [`MockDigitizer::refuse_allocations`]: allocation returns a null handle.
//! - [`MockDigitizer::limit_allocations`]: allocation fails past N live buffers.
//! - [`MockDigitizer::stall_after`]: waits time out once N buffers completed.
//! - [`MockDigitizer::fail_aborts`]: abort fails and leaves buffers posted.
//! - `MockConfig::fill_delay` longer than the wait timeout: waits time out.
//!
//! After an abort, waits fail with [`AlazarError::Aborted`] until the next
//! post.

use std::alloc::{self, Layout};
use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;
use std::time::Duration;

use ndarray::Array3;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::codes::{self, Capability, Parameter, SampleRate};
use crate::driver::{BoardQuery, ChannelInfo, DmaDriver, ElementWidth};
use crate::error::{AlazarError, Result};
use crate::flags::{Channels, PackMode};
use crate::geometry::{AcquisitionGeometry, MetadataKind, METADATA_BLOCK_BYTES};
use crate::layout;
use crate::metadata::{RecordFooter, RecordHeader};

/// Serial number written into mock record headers.
pub const MOCK_SERIAL_NUMBER: u32 = 0x1_2345;
/// Board type written into mock record headers (ATS9360).
pub const MOCK_BOARD_TYPE: u32 = 25;
/// Timestamp of record 0, just below the 32-bit boundary.
pub const MOCK_TIMESTAMP_BASE: u64 = 0xFFFF_F000;
/// Timestamp ticks between consecutive records.
pub const MOCK_TIMESTAMP_STEP: u64 = 1_000;

const ALLOC_ALIGN: usize = 64;

/// Synthetic sample value for `sample` of `channel` in record `record_number`.
#[must_use]
pub fn expected_sample(record_number: u64, channel: usize, sample: usize, bits: u32) -> u16 {
    let mask = (1u64 << bits) - 1;
    let value = record_number
        .wrapping_mul(31)
        .wrapping_add(channel as u64 * 1009)
        .wrapping_add(sample as u64);
    (value & mask) as u16
}

/// Synthetic timestamp of record `record_number`.
#[must_use]
pub fn expected_timestamp(record_number: u64) -> u64 {
    MOCK_TIMESTAMP_BASE + record_number * MOCK_TIMESTAMP_STEP
}

/// Encode one buffer of synthetic records starting at `first_record`.
///
/// # Errors
///
/// [`AlazarError::Layout`] when `bytes` is shorter than the geometry.
pub fn synthesize_buffer(
    geometry: &AcquisitionGeometry,
    first_record: u64,
    bytes: &mut [u8],
) -> Result<()> {
    let bits = geometry.sample_width().bits();
    let shape = (
        geometry.records_per_buffer(),
        geometry.channels(),
        geometry.samples_per_record(),
    );
    let samples = Array3::from_shape_fn(shape, |(r, c, t)| {
        expected_sample(first_record + r as u64, c, t, bits)
    });
    layout::write_samples(&samples, geometry, bytes)?;

    for record in 0..geometry.records_per_buffer() {
        let record_number = first_record + record as u64;
        let timestamp = expected_timestamp(record_number);
        for block in 0..geometry.metadata_multiplicity() {
            let Some(offset) = geometry.metadata_block_offset(record, block) else {
                break;
            };
            let encoded = match geometry.metadata() {
                MetadataKind::Header => RecordHeader::default()
                    .with_serial_number(MOCK_SERIAL_NUMBER)
                    .with_board_type(MOCK_BOARD_TYPE)
                    .with_sample_rate(SampleRate::Msps100)
                    .with_which_channel(block % 2 == 1)
                    .with_record_number(record_number as u32)
                    .with_timestamp(timestamp)
                    .to_bytes(),
                MetadataKind::Footer => RecordFooter::default()
                    .with_record_number(record_number as u32)
                    .with_timestamp(timestamp)
                    .with_frame_count(record_number as u32)
                    .to_storage(geometry.interleaved()),
                MetadataKind::None => break,
            };
            bytes[offset..offset + METADATA_BLOCK_BYTES].copy_from_slice(&encoded);
        }
    }
    Ok(())
}

/// Static properties of the simulated board.
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Native bits per sample.
    pub bits_per_sample: u32,
    /// Input channels on the board.
    pub channels_per_board: usize,
    /// On-board memory per channel in samples.
    pub memory_size_samples: u32,
    /// Board supports 8-bit packing.
    pub supports_8bit_packing: bool,
    /// Board supports 12-bit packing.
    pub supports_12bit_packing: bool,
    /// Board supports record footers.
    pub supports_record_footers: bool,
    /// Simulated time to fill one buffer.
    pub fill_delay: Duration,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            bits_per_sample: 16,
            channels_per_board: 4,
            memory_size_samples: 1 << 28,
            supports_8bit_packing: true,
            supports_12bit_packing: true,
            supports_record_footers: true,
            fill_delay: Duration::ZERO,
        }
    }
}

/// Operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    /// Successful allocations.
    pub allocations: u64,
    /// Successful frees.
    pub frees: u64,
    /// Frees rejected for an unknown address or mismatched width.
    pub rejected_frees: u64,
    /// Successful posts.
    pub posts: u64,
    /// Buffers filled.
    pub completions: u64,
    /// Waits that timed out.
    pub timeouts: u64,
    /// Abort calls.
    pub aborts: u64,
}

#[derive(Debug)]
struct Allocation {
    layout: Layout,
    width: ElementWidth,
}

#[derive(Debug, Clone, Copy)]
struct Posted {
    address: usize,
    size_bytes: usize,
}

#[derive(Debug, Default)]
struct MockState {
    allocations: HashMap<usize, Allocation>,
    posted: VecDeque<Posted>,
    geometry: Option<AcquisitionGeometry>,
    pack_mode: PackMode,
    next_record: u64,
    stall_after: Option<u64>,
    refuse_allocations: bool,
    fail_aborts: bool,
    aborted: bool,
    allocation_limit: Option<usize>,
    stats: MockStats,
}

/// Simulated AlazarTech board.
#[derive(Debug, Default)]
pub struct MockDigitizer {
    config: MockConfig,
    state: Mutex<MockState>,
}

fn driver_error(operation: &'static str, args: String, code: u32) -> AlazarError {
    AlazarError::Driver {
        operation,
        args,
        code,
        message: codes::return_code_text(code).to_string(),
    }
}

impl MockDigitizer {
    /// Mock of a 4-channel, 16-bit board supporting every packing mode.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock with explicit board properties.
    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Board properties.
    #[must_use]
    pub fn config(&self) -> &MockConfig {
        &self.config
    }

    /// Layout used to synthesize records on completion.
    ///
    /// Without a geometry, completed buffers are filled with a byte ramp.
    pub fn set_geometry(&self, geometry: AcquisitionGeometry) {
        let mut state = self.state.lock();
        state.geometry = Some(geometry);
        state.next_record = 0;
    }

    /// Set the pack mode reported by the pack mode parameter.
    pub fn set_pack_mode(&self, mode: PackMode) {
        self.state.lock().pack_mode = mode;
    }

    /// Make every further allocation fail.
    pub fn refuse_allocations(&self, refuse: bool) {
        self.state.lock().refuse_allocations = refuse;
    }

    /// Fail allocations once `limit` buffers are live.
    pub fn limit_allocations(&self, limit: Option<usize>) {
        self.state.lock().allocation_limit = limit;
    }

    /// Make every further abort fail without releasing posted buffers.
    pub fn fail_aborts(&self, fail: bool) {
        self.state.lock().fail_aborts = fail;
    }

    /// Time out every wait once `buffers` buffers have completed.
    pub fn stall_after(&self, buffers: Option<u64>) {
        self.state.lock().stall_after = buffers;
    }

    /// Number of allocations not yet freed.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.state.lock().allocations.len()
    }

    /// Number of buffers currently posted.
    #[must_use]
    pub fn posted_count(&self) -> usize {
        self.state.lock().posted.len()
    }

    /// Snapshot of the operation counters.
    #[must_use]
    pub fn stats(&self) -> MockStats {
        self.state.lock().stats
    }

    fn fill(state: &mut MockState, posted: Posted) -> Result<()> {
        // SAFETY: the address is a live allocation of at least `size_bytes`
        // bytes that the caller may not touch while it is posted.
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(posted.address as *mut u8, posted.size_bytes)
        };
        match state.geometry {
            Some(geometry) if geometry.total_bytes() <= bytes.len() => {
                synthesize_buffer(&geometry, state.next_record, bytes)?;
                state.next_record += geometry.records_per_buffer() as u64;
            }
            _ => {
                let seed = state.stats.completions;
                for (i, b) in bytes.iter_mut().enumerate() {
                    *b = (seed as usize).wrapping_add(i) as u8;
                }
            }
        }
        Ok(())
    }
}

impl DmaDriver for MockDigitizer {
    fn alloc_buffer(&self, width: ElementWidth, size_bytes: usize) -> Result<NonNull<u8>> {
        let mut state = self.state.lock();
        let allocation_error = |message: &str| AlazarError::Allocation {
            width,
            size_bytes,
            message: message.to_string(),
        };
        let at_limit = state
            .allocation_limit
            .is_some_and(|limit| state.allocations.len() >= limit);
        if state.refuse_allocations || at_limit {
            return Err(allocation_error("driver returned a null handle"));
        }
        if size_bytes == 0 || size_bytes % width.bytes() != 0 {
            return Err(allocation_error("size is not a whole number of elements"));
        }
        let layout = Layout::from_size_align(size_bytes, ALLOC_ALIGN)
            .map_err(|e| allocation_error(&e.to_string()))?;
        // SAFETY: the layout has a non-zero size.
        let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
            .ok_or_else(|| allocation_error("out of memory"))?;
        state
            .allocations
            .insert(ptr.as_ptr() as usize, Allocation { layout, width });
        state.stats.allocations += 1;
        trace!(size_bytes, width = %width, "Mock allocation");
        Ok(ptr)
    }

    unsafe fn free_buffer(&self, width: ElementWidth, ptr: NonNull<u8>) -> Result<()> {
        let mut state = self.state.lock();
        let address = ptr.as_ptr() as usize;
        let args = format!("buffer={address:#x}, width={width}");
        let allocated_width = state.allocations.get(&address).map(|a| a.width);
        if allocated_width != Some(width) {
            state.stats.rejected_frees += 1;
            return Err(driver_error("AlazarFreeBuffer", args, ats_sys::ApiFailed));
        }
        if state.posted.iter().any(|p| p.address == address) {
            return Err(driver_error("AlazarFreeBuffer", args, ats_sys::ApiDmaInProgress));
        }
        if let Some(allocation) = state.allocations.remove(&address) {
            // SAFETY: allocated in `alloc_buffer` with this layout and just
            // removed from the table, so it is freed once.
            unsafe { alloc::dealloc(ptr.as_ptr(), allocation.layout) };
            state.stats.frees += 1;
        }
        Ok(())
    }

    unsafe fn post_buffer(&self, ptr: NonNull<u8>, size_bytes: usize) -> Result<()> {
        let mut state = self.state.lock();
        let address = ptr.as_ptr() as usize;
        let args = format!("buffer={address:#x}, length={size_bytes}");
        let fits = state
            .allocations
            .get(&address)
            .is_some_and(|a| a.layout.size() >= size_bytes);
        if !fits || state.posted.iter().any(|p| p.address == address) {
            return Err(driver_error("AlazarPostAsyncBuffer", args, ats_sys::ApiFailed));
        }
        state.posted.push_back(Posted {
            address,
            size_bytes,
        });
        state.aborted = false;
        state.stats.posts += 1;
        Ok(())
    }

    fn wait_buffer_complete(&self, ptr: NonNull<u8>, timeout: Duration) -> Result<()> {
        let address = ptr.as_ptr() as usize;
        let args = format!("buffer={address:#x}, timeout_ms={}", timeout.as_millis());
        {
            let mut state = self.state.lock();
            if state.posted.front().map(|p| p.address) != Some(address) {
                if state.aborted {
                    return Err(AlazarError::Aborted);
                }
                return Err(driver_error(
                    "AlazarWaitAsyncBufferComplete",
                    args,
                    ats_sys::ApiBufferNotReady,
                ));
            }
            let stalled = state
                .stall_after
                .is_some_and(|limit| state.stats.completions >= limit);
            if stalled || self.config.fill_delay > timeout {
                state.stats.timeouts += 1;
                drop(state);
                std::thread::sleep(timeout);
                return Err(AlazarError::timeout("AlazarWaitAsyncBufferComplete", timeout));
            }
        }

        if !self.config.fill_delay.is_zero() {
            std::thread::sleep(self.config.fill_delay);
        }

        let mut state = self.state.lock();
        // An abort during the fill delay empties the queue.
        let posted = match state.posted.front().copied() {
            Some(p) if p.address == address => p,
            _ => return Err(AlazarError::Aborted),
        };
        state.posted.pop_front();
        Self::fill(&mut state, posted)?;
        state.stats.completions += 1;
        debug!(completions = state.stats.completions, "Mock buffer complete");
        Ok(())
    }

    fn abort(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_aborts {
            return Err(driver_error(
                "AlazarAbortAsyncRead",
                String::new(),
                ats_sys::ApiFailed,
            ));
        }
        let pending = state.posted.len();
        state.posted.clear();
        state.aborted = true;
        state.stats.aborts += 1;
        debug!(pending, "Mock transfer aborted");
        Ok(())
    }
}

impl BoardQuery for MockDigitizer {
    fn channel_info(&self) -> Result<ChannelInfo> {
        Ok(ChannelInfo {
            memory_size_samples: self.config.memory_size_samples,
            bits_per_sample: self.config.bits_per_sample,
        })
    }

    fn get_parameter(&self, channels: Channels, parameter: Parameter) -> Result<i64> {
        let state = self.state.lock();
        match parameter {
            Parameter::ChannelsPerBoard => Ok(self.config.channels_per_board as i64),
            Parameter::PackMode => Ok(state.pack_mode.code()),
            Parameter::DataWidth => Ok(i64::from(self.config.bits_per_sample)),
            Parameter::AsyncBuffersPending => Ok(state.posted.len() as i64),
            Parameter::RecordsCaptured => Ok(state.next_record as i64),
            Parameter::SamplesPerTimestampClock => Ok(1),
            other => Err(driver_error(
                "AlazarGetParameter",
                format!("channels={channels}, parameter={other:?}"),
                ats_sys::ApiFailed,
            )),
        }
    }

    fn query_capability(&self, capability: Capability) -> Result<u32> {
        Ok(match capability {
            Capability::SerialNumber => MOCK_SERIAL_NUMBER,
            Capability::BoardType => MOCK_BOARD_TYPE,
            Capability::MemorySize => self.config.memory_size_samples,
            Capability::MaxPretriggerSamples | Capability::MaxNptPretriggerSamples => 4088,
            Capability::TraditionalAutoDma | Capability::NptAutoDma => 1,
            Capability::RecordFootersSupport => u32::from(self.config.supports_record_footers),
            Capability::Support8BitPacking => u32::from(self.config.supports_8bit_packing),
            Capability::Support12BitPacking => u32::from(self.config.supports_12bit_packing),
        })
    }
}

impl Drop for MockDigitizer {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.allocations.is_empty() {
            warn!(leaked = state.allocations.len(), "Mock digitizer dropped with live buffers");
        }
        for (address, allocation) in state.allocations.drain() {
            // SAFETY: every table entry is a live allocation made with this
            // layout; nothing can use it once the driver is gone.
            unsafe { alloc::dealloc(address as *mut u8, allocation.layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::GeometryInputs;
    use crate::layout::extract_samples;
    use crate::metadata::{decode_footers, decode_headers};

    #[test]
    fn test_free_requires_matching_width() {
        let mock = MockDigitizer::new();
        let ptr = mock.alloc_buffer(ElementWidth::U16, 64).unwrap();
        // SAFETY: exercising the mock's bookkeeping; the pointer is live.
        unsafe {
            assert!(mock.free_buffer(ElementWidth::U8, ptr).is_err());
            assert_eq!(mock.stats().rejected_frees, 1);
            mock.free_buffer(ElementWidth::U16, ptr).unwrap();
            let err = mock.free_buffer(ElementWidth::U16, ptr).unwrap_err();
            assert!(err.is_hardware());
        }
        assert_eq!(mock.stats().frees, 1);
        assert_eq!(mock.stats().rejected_frees, 2);
        assert_eq!(mock.live_allocations(), 0);
    }

    #[test]
    fn test_wait_follows_post_order() {
        let mock = MockDigitizer::new();
        let a = mock.alloc_buffer(ElementWidth::U8, 32).unwrap();
        let b = mock.alloc_buffer(ElementWidth::U8, 32).unwrap();
        // SAFETY: both regions are live and untouched while posted.
        unsafe {
            mock.post_buffer(a, 32).unwrap();
            mock.post_buffer(b, 32).unwrap();
            assert!(mock.post_buffer(a, 32).is_err());
        }
        let err = mock.wait_buffer_complete(b, Duration::from_millis(1)).unwrap_err();
        assert!(matches!(err, AlazarError::Driver { code: ats_sys::ApiBufferNotReady, .. }));
        mock.wait_buffer_complete(a, Duration::from_millis(1)).unwrap();
        mock.wait_buffer_complete(b, Duration::from_millis(1)).unwrap();
        assert_eq!(mock.stats().completions, 2);
        // SAFETY: both regions completed and are no longer posted.
        unsafe {
            mock.free_buffer(ElementWidth::U8, a).unwrap();
            mock.free_buffer(ElementWidth::U8, b).unwrap();
        }
    }

    #[test]
    fn test_stall_times_out_and_keeps_buffer_posted() {
        let mock = MockDigitizer::new();
        mock.stall_after(Some(0));
        let ptr = mock.alloc_buffer(ElementWidth::U8, 16).unwrap();
        // SAFETY: live region, untouched while posted.
        unsafe { mock.post_buffer(ptr, 16).unwrap() };
        let err = mock.wait_buffer_complete(ptr, Duration::from_millis(2)).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(mock.posted_count(), 1);

        mock.stall_after(None);
        mock.wait_buffer_complete(ptr, Duration::from_millis(2)).unwrap();
        mock.abort().unwrap();
    }

    #[test]
    fn test_abort_cancels_waits_until_next_post() {
        let mock = MockDigitizer::new();
        let ptr = mock.alloc_buffer(ElementWidth::U8, 16).unwrap();
        // SAFETY: live region, untouched while posted.
        unsafe { mock.post_buffer(ptr, 16).unwrap() };

        mock.fail_aborts(true);
        assert!(mock.abort().unwrap_err().is_hardware());
        assert_eq!(mock.posted_count(), 1);

        mock.fail_aborts(false);
        mock.abort().unwrap();
        let err = mock.wait_buffer_complete(ptr, Duration::from_millis(2)).unwrap_err();
        assert!(matches!(err, AlazarError::Aborted));

        // SAFETY: as above.
        unsafe { mock.post_buffer(ptr, 16).unwrap() };
        mock.wait_buffer_complete(ptr, Duration::from_millis(2)).unwrap();
        // SAFETY: completed, no longer posted.
        unsafe { mock.free_buffer(ElementWidth::U8, ptr).unwrap() };
    }

    #[test]
    fn test_synthesized_headers_and_samples() {
        let geometry = AcquisitionGeometry::builder()
            .channels(2)
            .samples_per_record(16)
            .records_per_buffer(4)
            .record_headers(true)
            .build()
            .unwrap();
        let mut bytes = vec![0u8; geometry.total_bytes()];
        synthesize_buffer(&geometry, 8, &mut bytes).unwrap();

        let headers = decode_headers(&bytes, &geometry).unwrap().unwrap();
        assert_eq!(headers[0].record_number(), 8);
        assert_eq!(headers[3].record_number(), 11);
        assert_eq!(headers[1].timestamp(), expected_timestamp(9));
        assert!(headers[1].timestamp() > u64::from(u32::MAX));
        assert_eq!(headers[0].serial_number(), MOCK_SERIAL_NUMBER);
        assert_eq!(headers[0].sample_rate(), Some(SampleRate::Msps100));

        let data = extract_samples(&bytes, &geometry).unwrap();
        assert_eq!(data[[2, 1, 5]], expected_sample(10, 1, 5, 16));
    }

    #[test]
    fn test_synthesized_interleaved_footers() {
        let geometry = AcquisitionGeometry::builder()
            .channels(4)
            .samples_per_record(8)
            .records_per_buffer(2)
            .record_footers(true)
            .interleaved(true)
            .build()
            .unwrap();
        let mut bytes = vec![0u8; geometry.total_bytes()];
        synthesize_buffer(&geometry, 0x1_FFFF, &mut bytes).unwrap();
        let footers = decode_footers(&bytes, &geometry).unwrap().unwrap();
        assert_eq!(footers[0].record_number(), 0x1_FFFF);
        assert_eq!(footers[1].record_number(), 0x2_0000);
        assert_eq!(footers[1].timestamp(), expected_timestamp(0x2_0000));
    }

    #[test]
    fn test_board_queries() {
        let mock = MockDigitizer::with_config(MockConfig {
            bits_per_sample: 12,
            channels_per_board: 2,
            supports_12bit_packing: false,
            ..MockConfig::default()
        });
        assert!(GeometryInputs::query(&mock, PackMode::Bits12).is_err());
        let inputs = GeometryInputs::query(&mock, PackMode::Bits8).unwrap();
        assert_eq!(inputs.native_bits_per_sample, 12);
        assert_eq!(inputs.channels_per_board, 2);

        mock.set_pack_mode(PackMode::Bits8);
        assert_eq!(
            mock.get_parameter(Channels::empty(), Parameter::PackMode).unwrap(),
            PackMode::Bits8.code()
        );
        assert!(mock
            .get_parameter(Channels::A, Parameter::AsyncBufferCount)
            .is_err());
    }
}
