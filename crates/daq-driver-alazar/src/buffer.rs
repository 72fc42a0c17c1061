//! Owned DMA buffers.
//!
//! A [`DmaBuffer`] owns exactly one driver allocation. The region is freed
//! with the allocator that matches its element width, once: explicitly via
//! [`DmaBuffer::release`], which consumes the buffer, or on drop.
//!
//! While a buffer is posted the board owns its memory, so every accessor
//! returns [`AlazarError::InvalidState`] until the wait completes.

use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use ndarray::Array3;
use tracing::{debug, info, warn};

use crate::driver::{DmaDriver, ElementWidth};
use crate::error::{AlazarError, Result};
use crate::geometry::AcquisitionGeometry;
use crate::layout;
use crate::metadata::{self, RecordFooter, RecordHeader};

/// Flat view of a buffer's storage elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elements<'a> {
    /// Byte elements (8-bit and 12-bit packed data).
    U8(&'a [u8]),
    /// 16-bit elements.
    U16(&'a [u16]),
}

impl Elements<'_> {
    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::U8(e) => e.len(),
            Self::U16(e) => e.len(),
        }
    }

    /// Whether the view is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct Region {
    ptr: NonNull<u8>,
    width: ElementWidth,
    size_bytes: usize,
}

/// One DMA region sized by an [`AcquisitionGeometry`].
pub struct DmaBuffer<D: DmaDriver + ?Sized> {
    driver: Arc<D>,
    geometry: AcquisitionGeometry,
    region: Option<Region>,
    posted: bool,
}

// SAFETY: the region is exclusively owned by this buffer. Shared references
// only hand out immutable views, and only while the board is not writing.
unsafe impl<D: DmaDriver + ?Sized> Send for DmaBuffer<D> {}
unsafe impl<D: DmaDriver + ?Sized> Sync for DmaBuffer<D> {}

impl<D: DmaDriver + ?Sized> DmaBuffer<D> {
    /// Allocate a buffer for `geometry`.
    ///
    /// The element width follows the sample width: byte elements for 8-bit
    /// and 12-bit packed data, 16-bit elements otherwise.
    pub fn allocate(driver: Arc<D>, geometry: AcquisitionGeometry) -> Result<Self> {
        let width = geometry.element_width();
        let size_bytes = geometry.total_bytes();
        let ptr = driver.alloc_buffer(width, size_bytes)?;
        if width == ElementWidth::U16 && ptr.as_ptr().align_offset(2) != 0 {
            // SAFETY: just allocated with this width, never posted.
            unsafe { driver.free_buffer(width, ptr)? };
            return Err(AlazarError::Allocation {
                width,
                size_bytes,
                message: "driver returned a misaligned region".to_string(),
            });
        }
        info!(
            size_bytes,
            width = %width,
            address = format_args!("{:#x}", ptr.as_ptr() as usize),
            "Allocated DMA buffer"
        );
        Ok(Self {
            driver,
            geometry,
            region: Some(Region {
                ptr,
                width,
                size_bytes,
            }),
            posted: false,
        })
    }

    fn region(&self) -> Result<&Region> {
        self.region.as_ref().ok_or_else(|| AlazarError::InvalidState {
            message: "Buffer has been released".to_string(),
        })
    }

    fn readable(&self) -> Result<&Region> {
        if self.posted {
            return Err(AlazarError::InvalidState {
                message: "Buffer is posted to the board".to_string(),
            });
        }
        self.region()
    }

    /// Geometry the buffer was sized for.
    #[must_use]
    pub fn geometry(&self) -> &AcquisitionGeometry {
        &self.geometry
    }

    /// Start address of the region, for driver calls.
    #[must_use]
    pub fn as_ptr(&self) -> Option<NonNull<u8>> {
        self.region.as_ref().map(|r| r.ptr)
    }

    /// Start address of the region as an integer (0 once released).
    #[must_use]
    pub fn address(&self) -> usize {
        self.as_ptr().map_or(0, |p| p.as_ptr() as usize)
    }

    /// Size of the region in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.region.as_ref().map_or(0, |r| r.size_bytes)
    }

    /// Element width the region was allocated with.
    #[must_use]
    pub fn element_width(&self) -> ElementWidth {
        self.geometry.element_width()
    }

    /// Whether the board currently owns the region.
    #[must_use]
    pub fn is_posted(&self) -> bool {
        self.posted
    }

    /// Raw bytes of the region.
    pub fn as_bytes(&self) -> Result<&[u8]> {
        let region = self.readable()?;
        // SAFETY: the region is live, exclusively owned and not being written
        // by the board; the returned borrow is tied to &self.
        Ok(unsafe { std::slice::from_raw_parts(region.ptr.as_ptr(), region.size_bytes) })
    }

    /// Mutable raw bytes of the region.
    pub fn as_bytes_mut(&mut self) -> Result<&mut [u8]> {
        let region = self.readable()?;
        let (ptr, len) = (region.ptr, region.size_bytes);
        // SAFETY: as for `as_bytes`, and &mut self guarantees uniqueness.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), len) })
    }

    /// Flat view of the storage elements.
    pub fn elements(&self) -> Result<Elements<'_>> {
        let region = self.readable()?;
        let len = region.size_bytes / region.width.bytes();
        // SAFETY: alignment for u16 was checked at allocation, the length is
        // within the region, and the board is not writing.
        Ok(unsafe {
            match region.width {
                ElementWidth::U8 => Elements::U8(std::slice::from_raw_parts(region.ptr.as_ptr(), len)),
                ElementWidth::U16 => Elements::U16(std::slice::from_raw_parts(
                    region.ptr.as_ptr().cast::<u16>(),
                    len,
                )),
            }
        })
    }

    /// Storage elements of record `record`.
    pub fn record_elements(&self, record: usize) -> Result<Elements<'_>> {
        if record >= self.geometry.records_per_buffer() {
            return Err(AlazarError::layout(format!(
                "Record {record} out of range for {} records",
                self.geometry.records_per_buffer()
            )));
        }
        let per_record = self.geometry.elements_per_record();
        let range = record * per_record..(record + 1) * per_record;
        Ok(match self.elements()? {
            Elements::U8(e) => Elements::U8(&e[range]),
            Elements::U16(e) => Elements::U16(&e[range]),
        })
    }

    /// Record headers, or `None` when headers are disabled.
    pub fn get_headers(&self) -> Result<Option<Vec<RecordHeader>>> {
        metadata::decode_headers(self.as_bytes()?, &self.geometry)
    }

    /// Record footers, or `None` when footers are disabled.
    pub fn get_footers(&self) -> Result<Option<Vec<RecordFooter>>> {
        metadata::decode_footers(self.as_bytes()?, &self.geometry)
    }

    /// Owned `[record][channel][sample]` copy of the samples.
    pub fn get_data(&self) -> Result<Array3<u16>> {
        layout::extract_samples(self.as_bytes()?, &self.geometry)
    }

    /// Owned copy of the samples in storage order.
    pub fn get_data_native(&self) -> Result<Array3<u16>> {
        layout::extract_samples_native(self.as_bytes()?, &self.geometry)
    }

    /// Hand the region to the board.
    pub fn post(&mut self) -> Result<()> {
        if self.posted {
            return Err(AlazarError::InvalidState {
                message: "Buffer is already posted".to_string(),
            });
        }
        let region = self.region()?;
        // SAFETY: `posted` blocks every accessor until the wait completes or
        // the transfer is aborted, and Drop aborts before freeing.
        unsafe { self.driver.post_buffer(region.ptr, region.size_bytes)? };
        debug!(address = self.address(), "Posted buffer");
        self.posted = true;
        Ok(())
    }

    /// Wait for the board to fill the region.
    ///
    /// On timeout the buffer stays posted.
    pub fn wait(&mut self, timeout: Duration) -> Result<()> {
        if !self.posted {
            return Err(AlazarError::InvalidState {
                message: "Waiting on a buffer that is not posted".to_string(),
            });
        }
        let ptr = self.region()?.ptr;
        self.driver.wait_buffer_complete(ptr, timeout)?;
        self.posted = false;
        debug!(address = self.address(), "Buffer complete");
        Ok(())
    }

    /// Reclaim the region after the driver has aborted the transfer.
    pub(crate) fn mark_aborted(&mut self) {
        self.posted = false;
    }

    fn free(&mut self) -> Result<()> {
        if self.posted {
            self.driver.abort()?;
            self.posted = false;
        }
        let Some(region) = self.region.take() else {
            return Ok(());
        };
        // SAFETY: the region came from this driver with this width, is no
        // longer posted, and `take` guarantees it is freed once.
        unsafe { self.driver.free_buffer(region.width, region.ptr) }?;
        debug!(size_bytes = region.size_bytes, width = %region.width, "Released DMA buffer");
        Ok(())
    }

    /// Free the region now and report any driver error.
    pub fn release(mut self) -> Result<()> {
        self.free()
    }
}

impl<D: DmaDriver + ?Sized> Drop for DmaBuffer<D> {
    fn drop(&mut self) {
        if let Err(e) = self.free() {
            warn!(error = %e, "Failed to release DMA buffer");
        }
    }
}

impl<D: DmaDriver + ?Sized> std::fmt::Debug for DmaBuffer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaBuffer")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("size_bytes", &self.size_bytes())
            .field("width", &self.element_width())
            .field("posted", &self.posted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDigitizer;

    fn geometry(bits: u32) -> AcquisitionGeometry {
        AcquisitionGeometry::builder()
            .channels(2)
            .samples_per_record(8)
            .records_per_buffer(3)
            .native_bits_per_sample(bits)
            .build()
            .unwrap()
    }

    #[test]
    fn test_allocation_width_follows_geometry() {
        let mock = Arc::new(MockDigitizer::new());
        let narrow = DmaBuffer::allocate(mock.clone(), geometry(8)).unwrap();
        let wide = DmaBuffer::allocate(mock.clone(), geometry(16)).unwrap();
        assert_eq!(narrow.element_width(), ElementWidth::U8);
        assert_eq!(wide.element_width(), ElementWidth::U16);
        assert_eq!(narrow.size_bytes(), 2 * 8 * 3);
        assert_eq!(wide.size_bytes(), 2 * 2 * 8 * 3);
        assert_eq!(mock.live_allocations(), 2);

        assert_eq!(narrow.elements().unwrap().len(), 48);
        assert_eq!(wide.elements().unwrap().len(), 48);
        assert_eq!(wide.record_elements(2).unwrap().len(), 16);
        assert!(wide.record_elements(3).is_err());
    }

    #[test]
    fn test_release_frees_once_with_matching_width() {
        let mock = Arc::new(MockDigitizer::new());
        let buffer = DmaBuffer::allocate(mock.clone(), geometry(16)).unwrap();
        buffer.release().unwrap();
        assert_eq!(mock.live_allocations(), 0);
        assert_eq!(mock.stats().frees, 1);
        assert_eq!(mock.stats().rejected_frees, 0);

        {
            let _dropped = DmaBuffer::allocate(mock.clone(), geometry(8)).unwrap();
        }
        assert_eq!(mock.live_allocations(), 0);
        assert_eq!(mock.stats().frees, 2);
    }

    #[test]
    fn test_allocation_failure() {
        let mock = Arc::new(MockDigitizer::new());
        mock.refuse_allocations(true);
        let err = DmaBuffer::allocate(mock.clone(), geometry(16)).unwrap_err();
        assert!(matches!(err, AlazarError::Allocation { width: ElementWidth::U16, .. }));
        assert_eq!(mock.live_allocations(), 0);
    }

    #[test]
    fn test_posted_buffer_is_not_readable() {
        let mock = Arc::new(MockDigitizer::new());
        let mut buffer = DmaBuffer::allocate(mock.clone(), geometry(16)).unwrap();
        buffer.post().unwrap();
        assert!(buffer.is_posted());
        assert!(matches!(buffer.as_bytes(), Err(AlazarError::InvalidState { .. })));
        assert!(buffer.get_data().is_err());
        assert!(buffer.post().is_err());

        buffer.wait(Duration::from_millis(100)).unwrap();
        assert!(!buffer.is_posted());
        assert!(buffer.get_data().is_ok());
        assert!(buffer.wait(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_drop_while_posted_aborts_before_free() {
        let mock = Arc::new(MockDigitizer::new());
        let mut buffer = DmaBuffer::allocate(mock.clone(), geometry(16)).unwrap();
        buffer.post().unwrap();
        drop(buffer);
        assert_eq!(mock.stats().aborts, 1);
        assert_eq!(mock.live_allocations(), 0);
        assert_eq!(mock.stats().rejected_frees, 0);
    }

    #[test]
    fn test_bytes_round_trip_through_decoder() {
        let mock = Arc::new(MockDigitizer::new());
        let mut buffer = DmaBuffer::allocate(mock, geometry(16)).unwrap();
        for (i, pair) in buffer.as_bytes_mut().unwrap().chunks_exact_mut(2).enumerate() {
            pair.copy_from_slice(&(i as u16).to_le_bytes());
        }
        let data = buffer.get_data().unwrap();
        assert_eq!(data[[0, 0, 0]], 0);
        assert_eq!(data[[0, 1, 0]], 8);
        assert_eq!(data[[2, 1, 7]], 47);
        assert!(buffer.get_headers().unwrap().is_none());
        assert!(buffer.get_footers().unwrap().is_none());
    }
}
