//! Seams to the board driver.
//!
//! [`DmaDriver`] covers the memory side of an AutoDMA transfer: allocate,
//! post, wait, abort and free. [`BoardQuery`] covers the parameter and
//! capability queries the geometry depends on. The real board implements
//! both through `ats-sys`; [`MockDigitizer`](crate::mock::MockDigitizer)
//! implements them in memory.

use std::fmt;
use std::ptr::NonNull;
use std::time::Duration;

use tracing::debug;

use crate::codes::{Capability, Parameter};
use crate::error::{AlazarError, Result};
use crate::flags::{Channels, PackMode};

/// Default wait for a buffer to complete.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Storage unit handed to the driver allocator.
///
/// 8-bit and 12-bit packed data are allocated as byte streams, native
/// 16-bit data as 16-bit words. The matching free call must use the same
/// width as the allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementWidth {
    /// One byte per storage element (`AlazarAllocBufferU8`).
    U8,
    /// Two bytes per storage element (`AlazarAllocBufferU16`).
    U16,
}

impl ElementWidth {
    /// Size of one storage element in bytes.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
        }
    }
}

impl fmt::Display for ElementWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U8 => write!(f, "u8"),
            Self::U16 => write!(f, "u16"),
        }
    }
}

/// DMA memory operations of a board.
///
/// Implementations must be shareable across threads; the acquisition ring
/// holds the driver in an `Arc` shared by every buffer.
pub trait DmaDriver: Send + Sync {
    /// Allocate a DMA-capable region of `size_bytes` bytes.
    ///
    /// # Errors
    ///
    /// [`AlazarError::Allocation`] when the driver returns a null handle.
    fn alloc_buffer(&self, width: ElementWidth, size_bytes: usize) -> Result<NonNull<u8>>;

    /// Return a region to the driver.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`alloc_buffer`](Self::alloc_buffer) on this
    /// driver with the same `width`, must not have been freed already, and
    /// must not be posted.
    unsafe fn free_buffer(&self, width: ElementWidth, ptr: NonNull<u8>) -> Result<()>;

    /// Queue a region for the board to fill.
    ///
    /// # Safety
    ///
    /// The region must stay allocated and must not be read or written by the
    /// caller until [`wait_buffer_complete`](Self::wait_buffer_complete)
    /// returns `Ok` for it or [`abort`](Self::abort) has been called.
    unsafe fn post_buffer(&self, ptr: NonNull<u8>, size_bytes: usize) -> Result<()>;

    /// Block until the oldest posted region, which must be `ptr`, is full.
    ///
    /// # Errors
    ///
    /// [`AlazarError::Timeout`] when `timeout` elapses first; the region stays
    /// posted and the wait may be retried.
    fn wait_buffer_complete(&self, ptr: NonNull<u8>, timeout: Duration) -> Result<()>;

    /// Stop the transfer. Every posted region is released back to the caller.
    fn abort(&self) -> Result<()>;
}

/// On-board memory and native sample width of a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    /// On-board memory per channel in samples.
    pub memory_size_samples: u32,
    /// Native bits per sample.
    pub bits_per_sample: u32,
}

/// Parameter and capability queries.
pub trait BoardQuery {
    /// On-board memory and native bits per sample.
    fn channel_info(&self) -> Result<ChannelInfo>;

    /// Read a parameter. An empty channel selection addresses all channels.
    fn get_parameter(&self, channels: Channels, parameter: Parameter) -> Result<i64>;

    /// Query a board capability.
    fn query_capability(&self, capability: Capability) -> Result<u32>;
}

/// Board-reported inputs to the geometry calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryInputs {
    /// Native bits per sample.
    pub native_bits_per_sample: u32,
    /// Number of input channels on the board.
    pub channels_per_board: usize,
    /// Packing mode the geometry should assume.
    pub pack_mode: PackMode,
}

impl GeometryInputs {
    /// Query the board for the geometry inputs.
    ///
    /// # Errors
    ///
    /// [`AlazarError::Configuration`] when `pack_mode` is not supported by
    /// the board; driver errors from the queries are propagated.
    pub fn query<B: BoardQuery + ?Sized>(board: &B, pack_mode: PackMode) -> Result<Self> {
        let info = board.channel_info()?;
        let channels_per_board =
            usize::try_from(board.get_parameter(Channels::empty(), Parameter::ChannelsPerBoard)?)
                .map_err(|_| AlazarError::config("Board reported a negative channel count"))?;

        let capability = match pack_mode {
            PackMode::None => None,
            PackMode::Bits8 => Some(Capability::Support8BitPacking),
            PackMode::Bits12 => Some(Capability::Support12BitPacking),
        };
        if let Some(capability) = capability {
            if board.query_capability(capability)? == 0 {
                return Err(AlazarError::config(format!(
                    "Board does not support {pack_mode} packing"
                )));
            }
        }

        let inputs = Self {
            native_bits_per_sample: info.bits_per_sample,
            channels_per_board,
            pack_mode,
        };
        debug!(
            bits = inputs.native_bits_per_sample,
            channels = inputs.channels_per_board,
            pack_mode = %pack_mode,
            "Queried geometry inputs"
        );
        Ok(inputs)
    }

    /// Check a channel selection against the board's channel count.
    pub fn check_channels(&self, channels: Channels) -> Result<()> {
        let highest = channels.letters().last().copied();
        if let Some(letter) = highest {
            let index = (letter as u8 - b'A') as usize;
            if index >= self.channels_per_board {
                return Err(AlazarError::config(format!(
                    "Channel {letter} not present on a {}-channel board",
                    self.channels_per_board
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBoard {
        bits: u32,
        channels: i64,
        pack12: u32,
    }

    impl BoardQuery for FixedBoard {
        fn channel_info(&self) -> Result<ChannelInfo> {
            Ok(ChannelInfo {
                memory_size_samples: 1 << 20,
                bits_per_sample: self.bits,
            })
        }

        fn get_parameter(&self, _channels: Channels, parameter: Parameter) -> Result<i64> {
            match parameter {
                Parameter::ChannelsPerBoard => Ok(self.channels),
                other => Err(AlazarError::Driver {
                    operation: "AlazarGetParameter",
                    args: format!("{other:?}"),
                    code: ats_sys::ApiFailed,
                    message: "unsupported".to_string(),
                }),
            }
        }

        fn query_capability(&self, capability: Capability) -> Result<u32> {
            Ok(match capability {
                Capability::Support12BitPacking => self.pack12,
                _ => 1,
            })
        }
    }

    #[test]
    fn test_query_inputs() {
        let board = FixedBoard { bits: 12, channels: 2, pack12: 1 };
        let inputs = GeometryInputs::query(&board, PackMode::Bits12).unwrap();
        assert_eq!(inputs.native_bits_per_sample, 12);
        assert_eq!(inputs.channels_per_board, 2);
        assert_eq!(inputs.pack_mode, PackMode::Bits12);
    }

    #[test]
    fn test_unsupported_packing_rejected() {
        let board = FixedBoard { bits: 12, channels: 2, pack12: 0 };
        let err = GeometryInputs::query(&board, PackMode::Bits12).unwrap_err();
        assert!(err.is_configuration());
        assert!(GeometryInputs::query(&board, PackMode::None).is_ok());
    }

    #[test]
    fn test_check_channels() {
        let board = FixedBoard { bits: 16, channels: 2, pack12: 0 };
        let inputs = GeometryInputs::query(&board, PackMode::None).unwrap();
        assert!(inputs.check_channels(Channels::A | Channels::B).is_ok());
        assert!(inputs.check_channels(Channels::C).is_err());
    }

    #[test]
    fn test_element_width() {
        assert_eq!(ElementWidth::U8.bytes(), 1);
        assert_eq!(ElementWidth::U16.bytes(), 2);
        assert_eq!(ElementWidth::U16.to_string(), "u16");
    }
}
