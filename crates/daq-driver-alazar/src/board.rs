//! FFI-backed board handle.
//!
//! Requires the `hardware` feature and an installed ATS-SDK.
//!
//! Board configuration (clock, input ranges, trigger, record size and
//! `AlazarBeforeAsyncRead`) is done by the caller through [`AtsBoard::as_raw`]
//! before buffers are posted.

use std::ffi::CStr;
use std::os::raw::{c_long, c_void};
use std::ptr::NonNull;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::codes::{self, Capability, Parameter};
use crate::driver::{BoardQuery, ChannelInfo, DmaDriver, ElementWidth};
use crate::error::{AlazarError, Result};
use crate::flags::Channels;

/// Driver text for a return code.
fn error_text(code: u32) -> String {
    // SAFETY: AlazarErrorToText returns null or a pointer to a static,
    // NUL-terminated string.
    let ptr = unsafe { ats_sys::AlazarErrorToText(code) };
    if ptr.is_null() {
        codes::return_code_text(code).to_string()
    } else {
        // SAFETY: non-null and NUL-terminated, see above.
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}

fn check(operation: &'static str, args: impl FnOnce() -> String, code: u32) -> Result<()> {
    if code == ats_sys::ApiSuccess {
        Ok(())
    } else {
        Err(AlazarError::Driver {
            operation,
            args: args(),
            code,
            message: error_text(code),
        })
    }
}

/// Library version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Revision.
    pub revision: u8,
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

/// ATS-SDK version.
pub fn sdk_version() -> Result<Version> {
    let mut v = Version { major: 0, minor: 0, revision: 0 };
    // SAFETY: the out-pointers are valid for the duration of the call.
    let code = unsafe { ats_sys::AlazarGetSDKVersion(&mut v.major, &mut v.minor, &mut v.revision) };
    check("AlazarGetSDKVersion", String::new, code)?;
    Ok(v)
}

/// Kernel driver version.
pub fn driver_version() -> Result<Version> {
    let mut v = Version { major: 0, minor: 0, revision: 0 };
    // SAFETY: the out-pointers are valid for the duration of the call.
    let code =
        unsafe { ats_sys::AlazarGetDriverVersion(&mut v.major, &mut v.minor, &mut v.revision) };
    check("AlazarGetDriverVersion", String::new, code)?;
    Ok(v)
}

/// A digitizer board opened through ATSApi.
///
/// Board handles are owned by the driver library and are never closed.
/// Short calls are serialized through an internal lock; waits and aborts
/// are not, so an abort can interrupt a pending wait from another thread.
pub struct AtsBoard {
    handle: NonNull<c_void>,
    system_id: u32,
    board_id: u32,
    kind: u32,
    ffi_lock: Mutex<()>,
}

// SAFETY: the handle is an opaque token owned by the driver library; calls
// that are not safe to overlap are serialized through ffi_lock.
unsafe impl Send for AtsBoard {}
unsafe impl Sync for AtsBoard {}

impl AtsBoard {
    /// Open board `board_id` of board system `system_id` (both 1-based).
    pub fn open(system_id: u32, board_id: u32) -> Result<Self> {
        // SAFETY: plain lookup; returns null when the board does not exist.
        let raw = unsafe { ats_sys::AlazarGetBoardBySystemID(system_id, board_id) };
        let handle = NonNull::new(raw).ok_or_else(|| {
            AlazarError::config(format!("No board {board_id} in system {system_id}"))
        })?;
        // SAFETY: handle is a valid board handle.
        let kind = unsafe { ats_sys::AlazarGetBoardKind(handle.as_ptr()) };
        info!(system_id, board_id, kind, "Opened AlazarTech board");
        Ok(Self {
            handle,
            system_id,
            board_id,
            kind,
            ffi_lock: Mutex::new(()),
        })
    }

    /// Board system this board belongs to.
    #[must_use]
    pub fn system_id(&self) -> u32 {
        self.system_id
    }

    /// Board index within its system.
    #[must_use]
    pub fn board_id(&self) -> u32 {
        self.board_id
    }

    /// Board type code (`BOARD_TYPE` capability numbering).
    #[must_use]
    pub fn kind(&self) -> u32 {
        self.kind
    }

    /// Raw handle for board configuration calls.
    #[must_use]
    pub fn as_raw(&self) -> ats_sys::HANDLE {
        self.handle.as_ptr()
    }
}

impl std::fmt::Debug for AtsBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtsBoard")
            .field("system_id", &self.system_id)
            .field("board_id", &self.board_id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl DmaDriver for AtsBoard {
    fn alloc_buffer(&self, width: ElementWidth, size_bytes: usize) -> Result<NonNull<u8>> {
        let allocation_error = |message: &str| AlazarError::Allocation {
            width,
            size_bytes,
            message: message.to_string(),
        };
        let size = u32::try_from(size_bytes)
            .map_err(|_| allocation_error("size exceeds the 32-bit allocation limit"))?;
        let _guard = self.ffi_lock.lock();
        // SAFETY: valid handle; the driver returns null on failure.
        let raw = unsafe {
            match width {
                ElementWidth::U8 => ats_sys::AlazarAllocBufferU8(self.as_raw(), size),
                ElementWidth::U16 => {
                    ats_sys::AlazarAllocBufferU16(self.as_raw(), size).cast::<u8>()
                }
            }
        };
        let ptr = NonNull::new(raw).ok_or_else(|| allocation_error("driver returned a null handle"))?;
        debug!(size_bytes, %width, "Allocated DMA buffer");
        Ok(ptr)
    }

    unsafe fn free_buffer(&self, width: ElementWidth, ptr: NonNull<u8>) -> Result<()> {
        let _guard = self.ffi_lock.lock();
        // SAFETY: the caller guarantees ptr came from alloc_buffer with the
        // same width and is neither freed nor posted.
        let code = unsafe {
            match width {
                ElementWidth::U8 => ats_sys::AlazarFreeBufferU8(self.as_raw(), ptr.as_ptr()),
                ElementWidth::U16 => {
                    ats_sys::AlazarFreeBufferU16(self.as_raw(), ptr.as_ptr().cast::<u16>())
                }
            }
        };
        check(
            "AlazarFreeBuffer",
            || format!("buffer={:p}, width={width}", ptr.as_ptr()),
            code,
        )
    }

    unsafe fn post_buffer(&self, ptr: NonNull<u8>, size_bytes: usize) -> Result<()> {
        let length = u32::try_from(size_bytes).map_err(|_| {
            AlazarError::config(format!("Buffer of {size_bytes} bytes exceeds the transfer length"))
        })?;
        let _guard = self.ffi_lock.lock();
        // SAFETY: the caller keeps the region allocated and untouched until
        // it completes or the transfer is aborted.
        let code = unsafe {
            ats_sys::AlazarPostAsyncBuffer(self.as_raw(), ptr.as_ptr().cast::<c_void>(), length)
        };
        check(
            "AlazarPostAsyncBuffer",
            || format!("buffer={:p}, length={length}", ptr.as_ptr()),
            code,
        )
    }

    fn wait_buffer_complete(&self, ptr: NonNull<u8>, timeout: Duration) -> Result<()> {
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        // SAFETY: valid handle; the driver only compares the pointer against
        // its queue of posted buffers.
        let code = unsafe {
            ats_sys::AlazarWaitAsyncBufferComplete(
                self.as_raw(),
                ptr.as_ptr().cast::<c_void>(),
                timeout_ms,
            )
        };
        if let Some(err) =
            AlazarError::from_wait_code("AlazarWaitAsyncBufferComplete", code, timeout)
        {
            return Err(err);
        }
        check(
            "AlazarWaitAsyncBufferComplete",
            || format!("buffer={:p}, timeout_ms={timeout_ms}", ptr.as_ptr()),
            code,
        )
    }

    fn abort(&self) -> Result<()> {
        // SAFETY: valid handle.
        let code = unsafe { ats_sys::AlazarAbortAsyncRead(self.as_raw()) };
        check("AlazarAbortAsyncRead", String::new, code)
    }
}

impl BoardQuery for AtsBoard {
    fn channel_info(&self) -> Result<ChannelInfo> {
        let mut memory_size_samples = 0u32;
        let mut bits_per_sample = 0u8;
        let _guard = self.ffi_lock.lock();
        // SAFETY: valid handle and out-pointers.
        let code = unsafe {
            ats_sys::AlazarGetChannelInfo(
                self.as_raw(),
                &mut memory_size_samples,
                &mut bits_per_sample,
            )
        };
        check("AlazarGetChannelInfo", String::new, code)?;
        Ok(ChannelInfo {
            memory_size_samples,
            bits_per_sample: u32::from(bits_per_sample),
        })
    }

    fn get_parameter(&self, channels: Channels, parameter: Parameter) -> Result<i64> {
        let channel = if channels.is_empty() {
            ats_sys::CHANNEL_ALL
        } else {
            u8::try_from(channels.bits()).map_err(|_| {
                AlazarError::config(format!(
                    "AlazarGetParameter cannot address channels {channels}"
                ))
            })?
        };
        let mut value: c_long = 0;
        let _guard = self.ffi_lock.lock();
        // SAFETY: valid handle and out-pointer.
        let code = unsafe {
            ats_sys::AlazarGetParameter(self.as_raw(), channel, parameter.code(), &mut value)
        };
        check(
            "AlazarGetParameter",
            || format!("channel={channel:#x}, parameter={parameter:?}"),
            code,
        )?;
        Ok(i64::from(value))
    }

    fn query_capability(&self, capability: Capability) -> Result<u32> {
        let mut value = 0u32;
        let _guard = self.ffi_lock.lock();
        // SAFETY: valid handle and out-pointer.
        let code = unsafe {
            ats_sys::AlazarQueryCapability(self.as_raw(), capability.code(), 0, &mut value)
        };
        check(
            "AlazarQueryCapability",
            || format!("capability={capability:?}"),
            code,
        )?;
        Ok(value)
    }
}
