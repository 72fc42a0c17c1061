//! Round-robin AutoDMA acquisition over a ring of buffers.
//!
//! All buffers are posted in order at [`Acquisition::start`]. The board fills
//! them in the same order, so [`Acquisition::wait_next`] always waits on the
//! slot under the cursor. The returned [`CompletedBuffer`] mutably borrows
//! the acquisition: at most one buffer is held by the caller at a time, and
//! it is reposted when the guard is dropped.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use daq_driver_alazar::{Acquisition, AcquisitionGeometry, MockDigitizer};
//!
//! # fn example() -> daq_driver_alazar::Result<()> {
//! let board = Arc::new(MockDigitizer::new());
//! let geometry = AcquisitionGeometry::builder()
//!     .channels(2)
//!     .samples_per_record(1024)
//!     .records_per_buffer(8)
//!     .record_headers(true)
//!     .build()?;
//! board.set_geometry(geometry);
//!
//! let mut acquisition = Acquisition::new(board, geometry, 4)?.with_buffer_limit(10);
//! acquisition.start()?;
//! while !acquisition.is_done() {
//!     let buffer = acquisition.wait_next(Duration::from_secs(1))?;
//!     let headers = buffer.headers()?.unwrap_or_default();
//!     let samples = buffer.samples()?;
//!     assert_eq!(samples.dim(), (8, 2, 1024));
//!     assert_eq!(headers.len(), 8);
//!     buffer.repost()?;
//! }
//! acquisition.abort()?;
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use ndarray::Array3;
use tracing::{debug, info, warn};

use crate::buffer::DmaBuffer;
use crate::driver::DmaDriver;
use crate::error::{AlazarError, Result};
use crate::geometry::AcquisitionGeometry;
use crate::layout;
use crate::metadata::{self, RecordFooter, RecordHeader};

/// Lifecycle of an acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    /// Buffers allocated, nothing posted.
    Idle,
    /// Buffers posted to the board.
    Running,
    /// Transfer aborted; buffers are held by the host.
    Aborted,
}

/// Running counters of an acquisition.
#[derive(Debug, Clone, Default)]
pub struct AcquisitionStats {
    /// Buffers completed by the board.
    pub buffers_completed: u64,
    /// Records completed by the board.
    pub records_completed: u64,
    /// Bytes transferred.
    pub bytes_transferred: u64,
    /// Waits that timed out.
    pub timeouts: u64,
    /// When the acquisition started.
    pub started_at: Option<Instant>,
}

impl AcquisitionStats {
    /// Mean transfer rate since start.
    #[must_use]
    pub fn bytes_per_second(&self) -> Option<f64> {
        let elapsed = self.started_at?.elapsed().as_secs_f64();
        (elapsed > 0.0).then(|| self.bytes_transferred as f64 / elapsed)
    }
}

/// Buffer ring for one acquisition session.
pub struct Acquisition<D: DmaDriver + ?Sized> {
    driver: Arc<D>,
    geometry: AcquisitionGeometry,
    buffers: Vec<DmaBuffer<D>>,
    cursor: usize,
    state: AcquisitionState,
    buffer_limit: u64,
    stats: AcquisitionStats,
}

impl<D: DmaDriver + ?Sized> Acquisition<D> {
    /// Allocate `buffer_count` buffers for `geometry`.
    ///
    /// If any allocation fails, the buffers allocated so far are released
    /// and the error is returned.
    pub fn new(driver: Arc<D>, geometry: AcquisitionGeometry, buffer_count: usize) -> Result<Self> {
        if buffer_count == 0 {
            return Err(AlazarError::config("Buffer count must be greater than 0"));
        }
        let buffers = (0..buffer_count)
            .map(|_| DmaBuffer::allocate(Arc::clone(&driver), geometry))
            .collect::<Result<Vec<_>>>()?;
        info!(
            buffer_count,
            buffer_bytes = geometry.total_bytes(),
            %geometry,
            "Allocated acquisition buffers"
        );
        Ok(Self {
            driver,
            geometry,
            buffers,
            cursor: 0,
            state: AcquisitionState::Idle,
            buffer_limit: 0,
            stats: AcquisitionStats::default(),
        })
    }

    /// Stop after `buffers` completed buffers (0 = unbounded).
    #[must_use]
    pub fn with_buffer_limit(mut self, buffers: u64) -> Self {
        self.buffer_limit = buffers;
        self
    }

    /// Buffer geometry.
    #[must_use]
    pub fn geometry(&self) -> &AcquisitionGeometry {
        &self.geometry
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> &AcquisitionStats {
        &self.stats
    }

    /// Number of buffers in the ring.
    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Index of the slot the next wait will use.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Whether the buffer limit has been reached.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.buffer_limit > 0 && self.stats.buffers_completed >= self.buffer_limit
    }

    fn in_flight(&self) -> u64 {
        self.buffers.iter().filter(|b| b.is_posted()).count() as u64
    }

    fn wants_more(&self) -> bool {
        self.buffer_limit == 0 || self.stats.buffers_completed + self.in_flight() < self.buffer_limit
    }

    /// Post every buffer in ring order.
    pub fn start(&mut self) -> Result<()> {
        if self.state != AcquisitionState::Idle {
            return Err(AlazarError::InvalidState {
                message: format!("Cannot start an acquisition in state {:?}", self.state),
            });
        }
        self.state = AcquisitionState::Running;
        self.stats.started_at = Some(Instant::now());
        for index in 0..self.buffers.len() {
            if !self.wants_more() {
                break;
            }
            if let Err(e) = self.buffers[index].post() {
                warn!(index, error = %e, "Failed to post buffer, aborting");
                self.abort()?;
                return Err(e);
            }
        }
        info!(
            buffers = self.buffers.len(),
            limit = self.buffer_limit,
            "Acquisition started"
        );
        Ok(())
    }

    /// Wait for the buffer under the cursor.
    ///
    /// On timeout the buffer stays posted and the cursor does not move, so
    /// the call can be retried. When the driver reports the transfer aborted,
    /// the acquisition moves to [`AcquisitionState::Aborted`].
    pub fn wait_next(&mut self, timeout: Duration) -> Result<CompletedBuffer<'_, D>> {
        match self.state {
            AcquisitionState::Running => {}
            AcquisitionState::Aborted => return Err(AlazarError::Aborted),
            AcquisitionState::Idle => {
                return Err(AlazarError::InvalidState {
                    message: "Acquisition has not been started".to_string(),
                })
            }
        }
        if self.is_done() {
            return Err(AlazarError::InvalidState {
                message: format!("Buffer limit of {} reached", self.buffer_limit),
            });
        }

        let index = self.cursor;
        match self.buffers[index].wait(timeout) {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                self.stats.timeouts += 1;
                warn!(index, timeout_ms = timeout.as_millis() as u64, "Wait for buffer timed out");
                return Err(e);
            }
            Err(AlazarError::Aborted) => {
                // Aborted by another thread or by the board itself.
                self.mark_aborted();
                return Err(AlazarError::Aborted);
            }
            Err(e) => return Err(e),
        }

        let sequence = self.stats.buffers_completed;
        self.stats.buffers_completed += 1;
        self.stats.records_completed += self.geometry.records_per_buffer() as u64;
        self.stats.bytes_transferred += self.geometry.total_bytes() as u64;
        debug!(index, sequence, "Buffer completed");

        Ok(CompletedBuffer {
            acquisition: self,
            index,
            sequence,
            finished: false,
        })
    }

    /// Run until the buffer limit is reached, handing every completed buffer
    /// to `handler` and reposting it afterwards.
    pub fn run<F>(&mut self, timeout: Duration, mut handler: F) -> Result<()>
    where
        F: FnMut(&CompletedBuffer<'_, D>) -> Result<()>,
    {
        if self.state == AcquisitionState::Idle {
            self.start()?;
        }
        while !self.is_done() {
            let buffer = self.wait_next(timeout)?;
            handler(&buffer)?;
            buffer.repost()?;
        }
        Ok(())
    }

    /// Halt the transfer. Every buffer returns to the host and later waits
    /// fail with [`AlazarError::Aborted`].
    ///
    /// If the driver fails to abort, the acquisition stays running with its
    /// buffers posted; the call may be retried, and dropping the acquisition
    /// leaks the buffers rather than freeing memory the board may still write.
    pub fn abort(&mut self) -> Result<()> {
        if self.state == AcquisitionState::Aborted {
            return Ok(());
        }
        self.driver.abort()?;
        self.mark_aborted();
        Ok(())
    }

    fn mark_aborted(&mut self) {
        for buffer in &mut self.buffers {
            buffer.mark_aborted();
        }
        self.state = AcquisitionState::Aborted;
        info!(
            buffers_completed = self.stats.buffers_completed,
            timeouts = self.stats.timeouts,
            "Acquisition aborted"
        );
    }
}

impl<D: DmaDriver + ?Sized> std::fmt::Debug for Acquisition<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquisition")
            .field("geometry", &self.geometry)
            .field("buffers", &self.buffers)
            .field("cursor", &self.cursor)
            .field("state", &self.state)
            .field("buffer_limit", &self.buffer_limit)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<D: DmaDriver + ?Sized> Drop for Acquisition<D> {
    fn drop(&mut self) {
        if self.state == AcquisitionState::Running {
            if let Err(e) = self.abort() {
                warn!(error = %e, "Failed to abort acquisition on drop");
            }
        }
    }
}

/// A completed buffer held by the caller.
///
/// Dropping the guard reposts the buffer; use [`retire`](Self::retire) to
/// keep it off the board.
pub struct CompletedBuffer<'a, D: DmaDriver + ?Sized> {
    acquisition: &'a mut Acquisition<D>,
    index: usize,
    sequence: u64,
    finished: bool,
}

impl<D: DmaDriver + ?Sized> CompletedBuffer<'_, D> {
    fn buffer(&self) -> &DmaBuffer<D> {
        &self.acquisition.buffers[self.index]
    }

    /// Ring slot of this buffer.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Completion order within the acquisition, starting at 0.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Buffer geometry.
    #[must_use]
    pub fn geometry(&self) -> &AcquisitionGeometry {
        &self.acquisition.geometry
    }

    /// Raw bytes of the buffer.
    pub fn bytes(&self) -> Result<&[u8]> {
        self.buffer().as_bytes()
    }

    /// Record headers, or `None` when disabled.
    pub fn headers(&self) -> Result<Option<Vec<RecordHeader>>> {
        self.buffer().get_headers()
    }

    /// Record footers, or `None` when disabled.
    pub fn footers(&self) -> Result<Option<Vec<RecordFooter>>> {
        self.buffer().get_footers()
    }

    /// Owned `[record][channel][sample]` samples.
    pub fn samples(&self) -> Result<Array3<u16>> {
        self.buffer().get_data()
    }

    /// Owned samples in storage order.
    pub fn samples_native(&self) -> Result<Array3<u16>> {
        self.buffer().get_data_native()
    }

    /// Copy the raw bytes out so they can be decoded after reposting, or on
    /// another thread.
    pub fn copy_raw(&self) -> Result<RawBatch> {
        Ok(RawBatch {
            sequence: self.sequence,
            geometry: self.acquisition.geometry,
            data: Bytes::copy_from_slice(self.bytes()?),
        })
    }

    /// Advance the cursor past this slot. Returns false if already done.
    fn release_slot(&mut self) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;
        self.acquisition.cursor = (self.index + 1) % self.acquisition.buffers.len();
        true
    }

    fn finish(&mut self) -> Result<()> {
        if !self.release_slot() {
            return Ok(());
        }
        let acquisition = &mut *self.acquisition;
        if acquisition.state == AcquisitionState::Running && acquisition.wants_more() {
            acquisition.buffers[self.index].post()?;
        }
        Ok(())
    }

    /// Return the buffer to the board.
    ///
    /// Once enough buffers are completed or in flight to reach the buffer
    /// limit, the buffer is kept by the host instead.
    pub fn repost(mut self) -> Result<()> {
        self.finish()
    }

    /// Keep the buffer off the board. The slot will not complete again, so
    /// only retire buffers when draining an acquisition.
    pub fn retire(mut self) {
        self.release_slot();
    }

    /// Keep the buffer and abort the whole acquisition.
    pub fn abort(mut self) -> Result<()> {
        self.release_slot();
        self.acquisition.abort()
    }
}

impl<D: DmaDriver + ?Sized> std::fmt::Debug for CompletedBuffer<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletedBuffer")
            .field("index", &self.index)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl<D: DmaDriver + ?Sized> Drop for CompletedBuffer<'_, D> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!(index = self.index, error = %e, "Failed to repost buffer");
        }
    }
}

/// Owned copy of a completed buffer.
#[derive(Debug, Clone)]
pub struct RawBatch {
    sequence: u64,
    geometry: AcquisitionGeometry,
    data: Bytes,
}

impl RawBatch {
    /// Wrap raw bytes laid out by `geometry`.
    ///
    /// # Errors
    ///
    /// [`AlazarError::Layout`] unless `data` is exactly one buffer long.
    pub fn new(sequence: u64, geometry: AcquisitionGeometry, data: Bytes) -> Result<Self> {
        if data.len() != geometry.total_bytes() {
            return Err(AlazarError::layout(format!(
                "Raw batch holds {} bytes but the geometry describes {}",
                data.len(),
                geometry.total_bytes()
            )));
        }
        Ok(Self {
            sequence,
            geometry,
            data,
        })
    }

    /// Completion order within the acquisition.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Buffer geometry.
    #[must_use]
    pub fn geometry(&self) -> &AcquisitionGeometry {
        &self.geometry
    }

    /// Raw bytes.
    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Record headers, or `None` when disabled.
    pub fn headers(&self) -> Result<Option<Vec<RecordHeader>>> {
        metadata::decode_headers(&self.data, &self.geometry)
    }

    /// Record footers, or `None` when disabled.
    pub fn footers(&self) -> Result<Option<Vec<RecordFooter>>> {
        metadata::decode_footers(&self.data, &self.geometry)
    }

    /// Owned `[record][channel][sample]` samples.
    pub fn samples(&self) -> Result<Array3<u16>> {
        layout::extract_samples(&self.data, &self.geometry)
    }

    /// Owned samples in storage order.
    pub fn samples_native(&self) -> Result<Array3<u16>> {
        layout::extract_samples_native(&self.data, &self.geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{expected_sample, MockDigitizer};

    const WAIT: Duration = Duration::from_millis(50);

    fn setup(buffers: usize, limit: u64) -> (Arc<MockDigitizer>, Acquisition<MockDigitizer>) {
        let mock = Arc::new(MockDigitizer::new());
        let geometry = AcquisitionGeometry::builder()
            .channels(2)
            .samples_per_record(32)
            .records_per_buffer(4)
            .record_headers(true)
            .build()
            .unwrap();
        mock.set_geometry(geometry);
        let acquisition = Acquisition::new(mock.clone(), geometry, buffers)
            .unwrap()
            .with_buffer_limit(limit);
        (mock, acquisition)
    }

    #[test]
    fn test_round_robin_order() {
        let (mock, mut acq) = setup(3, 7);
        acq.start().unwrap();
        assert_eq!(mock.posted_count(), 3);

        let mut slots = Vec::new();
        let mut first_records = Vec::new();
        while !acq.is_done() {
            let buffer = acq.wait_next(WAIT).unwrap();
            slots.push(buffer.index());
            first_records.push(buffer.headers().unwrap().unwrap()[0].record_number());
            buffer.repost().unwrap();
        }
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(first_records, vec![0, 4, 8, 12, 16, 20, 24]);
        assert_eq!(acq.stats().buffers_completed, 7);
        assert_eq!(acq.stats().records_completed, 28);
        // Nothing beyond the limit was posted.
        assert_eq!(mock.posted_count(), 0);
        assert!(acq.wait_next(WAIT).is_err());
    }

    #[test]
    fn test_drop_guard_reposts() {
        let (mock, mut acq) = setup(2, 0);
        acq.start().unwrap();
        {
            let _buffer = acq.wait_next(WAIT).unwrap();
            assert_eq!(mock.posted_count(), 1);
        }
        assert_eq!(mock.posted_count(), 2);
        assert_eq!(acq.cursor(), 1);
    }

    #[test]
    fn test_retire_advances_without_reposting() {
        let (mock, mut acq) = setup(2, 0);
        acq.start().unwrap();
        acq.wait_next(WAIT).unwrap().retire();
        assert_eq!(acq.cursor(), 1);
        assert_eq!(mock.posted_count(), 1);
        assert_eq!(mock.stats().posts, 2);
    }

    #[test]
    fn test_timeout_keeps_cursor() {
        let (mock, mut acq) = setup(2, 0);
        acq.start().unwrap();
        acq.wait_next(WAIT).unwrap().repost().unwrap();

        mock.stall_after(Some(1));
        let err = acq.wait_next(Duration::from_millis(5)).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(acq.cursor(), 1);
        assert_eq!(acq.stats().timeouts, 1);

        mock.stall_after(None);
        let buffer = acq.wait_next(WAIT).unwrap();
        assert_eq!(buffer.index(), 1);
        assert_eq!(buffer.sequence(), 1);
    }

    #[test]
    fn test_abort_fails_later_waits() {
        let (mock, mut acq) = setup(4, 0);
        acq.start().unwrap();
        acq.wait_next(WAIT).unwrap().abort().unwrap();
        assert_eq!(acq.state(), AcquisitionState::Aborted);
        assert_eq!(mock.posted_count(), 0);
        assert!(matches!(acq.wait_next(WAIT), Err(AlazarError::Aborted)));
        drop(acq);
        assert_eq!(mock.live_allocations(), 0);
        assert_eq!(mock.stats().rejected_frees, 0);
    }

    #[test]
    fn test_driver_abort_moves_ring_to_aborted() {
        let (mock, mut acq) = setup(3, 0);
        acq.start().unwrap();
        acq.wait_next(WAIT).unwrap().repost().unwrap();

        mock.abort().unwrap();
        assert!(matches!(acq.wait_next(WAIT), Err(AlazarError::Aborted)));
        assert_eq!(acq.state(), AcquisitionState::Aborted);
        assert!(matches!(acq.wait_next(WAIT), Err(AlazarError::Aborted)));
        drop(acq);
        assert_eq!(mock.live_allocations(), 0);
        assert_eq!(mock.stats().rejected_frees, 0);
    }

    #[test]
    fn test_failed_abort_keeps_buffers_posted() {
        let (mock, mut acq) = setup(3, 0);
        acq.start().unwrap();
        mock.fail_aborts(true);
        assert!(acq.abort().is_err());
        assert_eq!(acq.state(), AcquisitionState::Running);
        assert_eq!(mock.posted_count(), 3);

        mock.fail_aborts(false);
        acq.abort().unwrap();
        assert_eq!(acq.state(), AcquisitionState::Aborted);
        drop(acq);
        assert_eq!(mock.stats().frees, 3);
    }

    #[test]
    fn test_failed_abort_on_drop_leaks_instead_of_freeing() {
        let (mock, mut acq) = setup(3, 0);
        acq.start().unwrap();
        mock.fail_aborts(true);
        drop(acq);
        assert_eq!(mock.stats().frees, 0);
        assert_eq!(mock.stats().rejected_frees, 0);
        assert_eq!(mock.live_allocations(), 3);
        assert_eq!(mock.posted_count(), 3);
    }

    #[test]
    fn test_raw_batch_length_must_match_geometry() {
        let geometry = AcquisitionGeometry::builder().samples_per_record(8).build().unwrap();
        let exact = Bytes::from(vec![0u8; geometry.total_bytes()]);
        assert!(RawBatch::new(0, geometry, exact).is_ok());
        for len in [geometry.total_bytes() - 1, geometry.total_bytes() + 2] {
            let err = RawBatch::new(0, geometry, Bytes::from(vec![0u8; len])).unwrap_err();
            assert!(matches!(err, AlazarError::Layout { .. }));
        }
    }

    #[test]
    fn test_drop_running_acquisition_aborts_then_frees() {
        let (mock, mut acq) = setup(3, 0);
        acq.start().unwrap();
        drop(acq);
        assert_eq!(mock.stats().aborts, 1);
        assert_eq!(mock.live_allocations(), 0);
    }

    #[test]
    fn test_failed_allocation_releases_partial_ring() {
        let mock = Arc::new(MockDigitizer::new());
        let geometry = AcquisitionGeometry::builder().build().unwrap();
        mock.limit_allocations(Some(2));
        let err = Acquisition::new(mock.clone(), geometry, 4).unwrap_err();
        assert!(matches!(err, AlazarError::Allocation { .. }));
        assert_eq!(mock.stats().allocations, 2);
        assert_eq!(mock.stats().frees, 2);
        assert_eq!(mock.live_allocations(), 0);

        mock.limit_allocations(None);
        assert!(Acquisition::new(mock, geometry, 0).unwrap_err().is_configuration());
    }

    #[test]
    fn test_copy_raw_outlives_repost() {
        let (_mock, mut acq) = setup(2, 0);
        acq.start().unwrap();
        let buffer = acq.wait_next(WAIT).unwrap();
        let batch = buffer.copy_raw().unwrap();
        buffer.repost().unwrap();

        let handle = std::thread::spawn(move || batch.samples());
        let samples = handle.join().unwrap().unwrap();
        assert_eq!(samples[[3, 1, 31]], expected_sample(3, 1, 31, 16));
    }

    #[test]
    fn test_run_handles_every_buffer() {
        let (_mock, mut acq) = setup(2, 5);
        let mut seen = Vec::new();
        acq.run(WAIT, |buffer| {
            seen.push(buffer.sequence());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_wait_before_start() {
        let (_mock, mut acq) = setup(1, 0);
        assert!(matches!(acq.wait_next(WAIT), Err(AlazarError::InvalidState { .. })));
        acq.start().unwrap();
        assert!(acq.start().is_err());
    }
}
