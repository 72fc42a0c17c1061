//! Low-level FFI bindings for the AlazarTech ATS digitizer API.
//!
//! This crate provides raw, unsafe declarations for the subset of `ATSApi`
//! that the AutoDMA data plane needs: DMA buffer allocation per element
//! width, buffer posting and completion waits, abort, parameter and
//! capability queries, and error text lookup.
//!
//! # Safety
//!
//! All functions in this crate are `unsafe` as they are direct FFI bindings.
//! For a safe wrapper, use the `daq-driver-alazar` crate instead.
//!
//! # Features
//!
//! - `ats-sdk`: Declare and link the vendor entry points.
//!   Without this feature only the constants are available, so dependent
//!   crates build and test on machines without the SDK installed.
//!
//! # Example (unsafe)
//!
//! ```ignore
//! use ats_sys::*;
//!
//! unsafe {
//!     let board = AlazarGetBoardBySystemID(1, 1);
//!     if !board.is_null() {
//!         let buf = AlazarAllocBufferU16(board, 1 << 20);
//!         // ... post, wait ...
//!         AlazarFreeBufferU16(board, buf);
//!     }
//! }
//! ```

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]
#![allow(missing_docs)]
#![allow(clippy::all)]

#[cfg(feature = "ats-sdk")]
use std::os::raw::c_char;
use std::os::raw::{c_long, c_void};

/// Opaque board handle.
pub type HANDLE = *mut c_void;
/// Unsigned 8-bit integer as used by the API headers.
pub type U8 = u8;
/// Unsigned 16-bit integer as used by the API headers.
pub type U16 = u16;
/// Unsigned 32-bit integer as used by the API headers.
pub type U32 = u32;
/// Status code returned by every fallible API call.
pub type RETURN_CODE = u32;

// =============================================================================
// Return codes (AlazarError.h)
// =============================================================================

/// The operation completed without error.
pub const ApiSuccess: RETURN_CODE = 512;
/// The operation failed.
pub const ApiFailed: RETURN_CODE = 513;
/// Access to the device was denied.
pub const ApiAccessDenied: RETURN_CODE = 514;
/// A DMA transfer is in progress.
pub const ApiDmaInProgress: RETURN_CODE = 518;
/// The buffer passed was not the next buffer in the posted list.
pub const ApiBufferNotReady: RETURN_CODE = 573;
/// The wait interval elapsed before the buffer was filled.
pub const ApiWaitTimeout: RETURN_CODE = 579;
/// The wait was cancelled because the transfer was aborted.
pub const ApiWaitCanceled: RETURN_CODE = 580;
/// The board overflowed its on-board memory.
pub const ApiBufferOverflow: RETURN_CODE = 582;
/// The acquisition finished; no further buffers will complete.
pub const ApiTransferComplete: RETURN_CODE = 589;

// =============================================================================
// AutoDMA flags (AlazarBeforeAsyncRead)
// =============================================================================

pub const ADMA_TRADITIONAL_MODE: U32 = 0x0;
pub const ADMA_CONTINUOUS_MODE: U32 = 0x100;
pub const ADMA_NPT: U32 = 0x200;
pub const ADMA_TRIGGERED_STREAMING: U32 = 0x400;
pub const ADMA_EXTERNAL_STARTCAPTURE: U32 = 0x1;
pub const ADMA_ENABLE_RECORD_HEADERS: U32 = 0x8;
pub const ADMA_ALLOC_BUFFERS: U32 = 0x20;
pub const ADMA_FIFO_ONLY_STREAMING: U32 = 0x800;
pub const ADMA_INTERLEAVE_SAMPLES: U32 = 0x1000;
pub const ADMA_GET_PROCESSED_DATA: U32 = 0x2000;
pub const ADMA_DSP: U32 = 0x4000;
pub const ADMA_ENABLE_RECORD_FOOTERS: U32 = 0x10000;
pub const ADMA_PARALLEL_DMA: U32 = 0x20000;

// =============================================================================
// Parameters (AlazarGetParameter)
// =============================================================================

pub const DATA_WIDTH: U32 = 0x10000009;
pub const SETGET_ASYNC_BUFFSIZE_BYTES: U32 = 0x10000039;
pub const SETGET_ASYNC_BUFFCOUNT: U32 = 0x10000040;
pub const GET_ASYNC_BUFFERS_PENDING: U32 = 0x10000050;
pub const GET_ASYNC_BUFFERS_PENDING_FULL: U32 = 0x10000051;
pub const GET_ASYNC_BUFFERS_PENDING_EMPTY: U32 = 0x10000052;
pub const GET_DATA_FORMAT: U32 = 0x10000042;
pub const GET_SAMPLES_PER_TIMESTAMP_CLOCK: U32 = 0x10000044;
pub const GET_RECORDS_CAPTURED: U32 = 0x10000045;
pub const GET_CHANNELS_PER_BOARD: U32 = 0x10000070;
pub const PACK_MODE: U32 = 0x10000072;

// Pack mode values returned for PACK_MODE
pub const PACK_DEFAULT: c_long = 0;
pub const PACK_8_BITS_PER_SAMPLE: c_long = 1;
pub const PACK_12_BITS_PER_SAMPLE: c_long = 2;

// =============================================================================
// Capabilities (AlazarQueryCapability)
// =============================================================================

pub const GET_SERIAL_NUMBER: U32 = 0x10000024;
pub const MEMORY_SIZE: U32 = 0x1000002A;
pub const BOARD_TYPE: U32 = 0x1000002B;
pub const GET_MAX_PRETRIGGER_SAMPLES: U32 = 0x10000046;
pub const HAS_RECORD_FOOTERS_SUPPORT: U32 = 0x10000073;
pub const CAP_SUPPORTS_TRADITIONAL_AUTODMA: U32 = 0x10000074;
pub const CAP_SUPPORTS_NPT_AUTODMA: U32 = 0x10000075;
pub const CAP_MAX_NPT_PRETRIGGER_SAMPLES: U32 = 0x10000076;
pub const CAP_SUPPORT_8_BIT_PACKING: U32 = 0x10000079;
pub const CAP_SUPPORT_12_BIT_PACKING: U32 = 0x10000080;

/// Channel selector meaning "all channels" for per-channel parameters.
pub const CHANNEL_ALL: U8 = 0;

// =============================================================================
// Entry points
// =============================================================================

#[cfg(feature = "ats-sdk")]
extern "C" {
    pub fn AlazarErrorToText(code: RETURN_CODE) -> *const c_char;

    pub fn AlazarGetSDKVersion(major: *mut U8, minor: *mut U8, revision: *mut U8) -> RETURN_CODE;
    pub fn AlazarGetDriverVersion(major: *mut U8, minor: *mut U8, revision: *mut U8)
        -> RETURN_CODE;

    pub fn AlazarGetBoardBySystemID(system_id: U32, board_id: U32) -> HANDLE;
    pub fn AlazarGetBoardKind(handle: HANDLE) -> U32;
    pub fn AlazarGetChannelInfo(
        handle: HANDLE,
        memory_size_samples: *mut U32,
        bits_per_sample: *mut U8,
    ) -> RETURN_CODE;

    pub fn AlazarAllocBufferU8(handle: HANDLE, size_bytes: U32) -> *mut U8;
    pub fn AlazarAllocBufferU16(handle: HANDLE, size_bytes: U32) -> *mut U16;
    pub fn AlazarFreeBufferU8(handle: HANDLE, buffer: *mut U8) -> RETURN_CODE;
    pub fn AlazarFreeBufferU16(handle: HANDLE, buffer: *mut U16) -> RETURN_CODE;

    pub fn AlazarPostAsyncBuffer(handle: HANDLE, buffer: *mut c_void, buffer_length: U32)
        -> RETURN_CODE;
    pub fn AlazarWaitAsyncBufferComplete(
        handle: HANDLE,
        buffer: *mut c_void,
        timeout_ms: U32,
    ) -> RETURN_CODE;
    pub fn AlazarAbortAsyncRead(handle: HANDLE) -> RETURN_CODE;

    pub fn AlazarGetParameter(
        handle: HANDLE,
        channel: U8,
        parameter: U32,
        ret_value: *mut c_long,
    ) -> RETURN_CODE;
    pub fn AlazarQueryCapability(
        handle: HANDLE,
        request: U32,
        value: U32,
        ret_value: *mut U32,
    ) -> RETURN_CODE;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_codes() {
        assert_eq!(ApiSuccess, 512);
        assert_eq!(ApiFailed, ApiSuccess + 1);
        assert_eq!(ApiWaitTimeout, 579);
        assert_eq!(ApiWaitCanceled, ApiWaitTimeout + 1);
    }

    #[test]
    fn test_adma_flags_disjoint() {
        let flags = [
            ADMA_CONTINUOUS_MODE,
            ADMA_NPT,
            ADMA_TRIGGERED_STREAMING,
            ADMA_EXTERNAL_STARTCAPTURE,
            ADMA_ENABLE_RECORD_HEADERS,
            ADMA_ALLOC_BUFFERS,
            ADMA_FIFO_ONLY_STREAMING,
            ADMA_INTERLEAVE_SAMPLES,
            ADMA_GET_PROCESSED_DATA,
            ADMA_DSP,
            ADMA_ENABLE_RECORD_FOOTERS,
            ADMA_PARALLEL_DMA,
        ];
        let mut seen = 0u32;
        for flag in flags {
            assert_eq!(seen & flag, 0, "flag {:#x} overlaps", flag);
            seen |= flag;
        }
    }
}
