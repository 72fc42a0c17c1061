//! Transfer flags, channel selections and packing modes.
//!
//! Mode and flag composition is done exclusively on [`AdmaFlags`]; the raw
//! `u32` handed to the driver is produced by [`AdmaFlags::bits`] in one place.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{AlazarError, Result};

bitflags! {
    /// AutoDMA transfer flags, including the acquisition mode bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AdmaFlags: u32 {
        /// Start capture on an external trigger instead of software start.
        const EXTERNAL_STARTCAPTURE = ats_sys::ADMA_EXTERNAL_STARTCAPTURE;
        /// Prefix each record with a 16-byte header (traditional mode).
        const ENABLE_RECORD_HEADERS = ats_sys::ADMA_ENABLE_RECORD_HEADERS;
        /// Let the driver allocate buffers itself.
        const ALLOC_BUFFERS = ats_sys::ADMA_ALLOC_BUFFERS;
        /// Stream without on-board memory.
        const FIFO_ONLY_STREAMING = ats_sys::ADMA_FIFO_ONLY_STREAMING;
        /// Store samples timepoint-major instead of per channel.
        const INTERLEAVE_SAMPLES = ats_sys::ADMA_INTERLEAVE_SAMPLES;
        /// Return processed rather than raw sample codes.
        const GET_PROCESSED_DATA = ats_sys::ADMA_GET_PROCESSED_DATA;
        /// Route data through the on-board DSP.
        const DSP = ats_sys::ADMA_DSP;
        /// Append a 16-byte footer to each record (NPT mode).
        const ENABLE_RECORD_FOOTERS = ats_sys::ADMA_ENABLE_RECORD_FOOTERS;
        /// Parallel DMA transfers.
        const PARALLEL_DMA = ats_sys::ADMA_PARALLEL_DMA;
        /// Continuous streaming mode bit.
        const CONTINUOUS_MODE = ats_sys::ADMA_CONTINUOUS_MODE;
        /// No-pre-trigger mode bit.
        const NPT = ats_sys::ADMA_NPT;
        /// Triggered streaming mode bit.
        const TRIGGERED_STREAMING = ats_sys::ADMA_TRIGGERED_STREAMING;
    }
}

impl AdmaFlags {
    const MODE_MASK: Self = Self::CONTINUOUS_MODE
        .union(Self::NPT)
        .union(Self::TRIGGERED_STREAMING);

    /// Acquisition mode encoded in these flags.
    ///
    /// Returns `None` when more than one mode bit is set.
    #[must_use]
    pub fn mode(self) -> Option<AdmaMode> {
        let bits = self.intersection(Self::MODE_MASK);
        if bits.is_empty() {
            Some(AdmaMode::Traditional)
        } else if bits == Self::CONTINUOUS_MODE {
            Some(AdmaMode::Continuous)
        } else if bits == Self::NPT {
            Some(AdmaMode::Npt)
        } else if bits == Self::TRIGGERED_STREAMING {
            Some(AdmaMode::TriggeredStreaming)
        } else {
            None
        }
    }

    /// Replace the mode bits with `mode`, keeping every other flag.
    #[must_use]
    pub fn with_mode(self, mode: AdmaMode) -> Self {
        self.difference(Self::MODE_MASK).union(mode.flags())
    }
}

/// AutoDMA acquisition mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmaMode {
    /// Pre-trigger capable record mode; may carry record headers.
    #[default]
    Traditional,
    /// Gapless streaming with no trigger.
    Continuous,
    /// No-pre-trigger record mode; may carry record footers.
    Npt,
    /// Streaming started by a single trigger.
    TriggeredStreaming,
}

impl AdmaMode {
    /// Mode bits to OR into the transfer flags.
    #[must_use]
    pub const fn flags(self) -> AdmaFlags {
        match self {
            Self::Traditional => AdmaFlags::empty(),
            Self::Continuous => AdmaFlags::CONTINUOUS_MODE,
            Self::Npt => AdmaFlags::NPT,
            Self::TriggeredStreaming => AdmaFlags::TRIGGERED_STREAMING,
        }
    }
}

bitflags! {
    /// Selection of board input channels.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Channels: u16 {
        const A = 1 << 0;
        const B = 1 << 1;
        const C = 1 << 2;
        const D = 1 << 3;
        const E = 1 << 4;
        const F = 1 << 5;
        const G = 1 << 6;
        const H = 1 << 7;
        const I = 1 << 8;
        const J = 1 << 9;
        const K = 1 << 10;
        const L = 1 << 11;
        const M = 1 << 12;
        const N = 1 << 13;
        const O = 1 << 14;
        const P = 1 << 15;
    }
}

impl Channels {
    /// Maximum number of channels on any supported board.
    pub const MAX: usize = 16;

    /// Channel for a zero-based index (0 = A).
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        if index < Self::MAX {
            Some(Self::from_bits_retain(1 << index))
        } else {
            None
        }
    }

    /// Channel for an upper- or lower-case letter.
    #[must_use]
    pub fn from_letter(letter: char) -> Option<Self> {
        let upper = letter.to_ascii_uppercase();
        if upper.is_ascii_uppercase() {
            Self::from_index((upper as u8 - b'A') as usize)
        } else {
            None
        }
    }

    /// Number of selected channels.
    #[must_use]
    pub fn active_count(self) -> usize {
        self.bits().count_ones() as usize
    }

    /// Letters of the selected channels in ascending order.
    #[must_use]
    pub fn letters(self) -> Vec<char> {
        (0..Self::MAX)
            .filter(|&i| self.bits() & (1 << i) != 0)
            .map(|i| (b'A' + i as u8) as char)
            .collect()
    }
}

impl fmt::Display for Channels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letters: String = self.letters().into_iter().collect();
        if letters.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{letters}")
        }
    }
}

impl FromStr for Channels {
    type Err = AlazarError;

    /// Parse a letter list such as `"AB"`, `"a,c"` or `"A B D"`.
    fn from_str(s: &str) -> Result<Self> {
        let mut channels = Self::empty();
        for c in s.chars().filter(|c| !c.is_whitespace() && *c != ',') {
            let channel = Self::from_letter(c)
                .ok_or_else(|| AlazarError::config(format!("Unknown channel '{c}'")))?;
            channels |= channel;
        }
        if channels.is_empty() {
            return Err(AlazarError::config("No channels selected"));
        }
        Ok(channels)
    }
}

/// On-wire sample packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PackMode {
    /// Native sample width of the board.
    #[default]
    #[serde(rename = "none")]
    None,
    /// One byte per sample.
    #[serde(rename = "8-bit")]
    Bits8,
    /// Two samples in three bytes; requires interleaved samples.
    #[serde(rename = "12-bit")]
    Bits12,
}

impl PackMode {
    /// Value reported by the pack mode parameter.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::None => ats_sys::PACK_DEFAULT as i64,
            Self::Bits8 => ats_sys::PACK_8_BITS_PER_SAMPLE as i64,
            Self::Bits12 => ats_sys::PACK_12_BITS_PER_SAMPLE as i64,
        }
    }

    /// Pack mode for a parameter value.
    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        [Self::None, Self::Bits8, Self::Bits12]
            .into_iter()
            .find(|m| m.code() == code)
    }

    /// Whether samples are packed below the native width.
    #[must_use]
    pub fn is_packed(self) -> bool {
        self != Self::None
    }
}

impl fmt::Display for PackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Bits8 => write!(f, "8-bit"),
            Self::Bits12 => write!(f, "12-bit"),
        }
    }
}

impl FromStr for PackMode {
    type Err = AlazarError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "default" => Ok(Self::None),
            "8-bit" | "8" => Ok(Self::Bits8),
            "12-bit" | "12" => Ok(Self::Bits12),
            other => Err(AlazarError::config(format!("Unknown pack mode '{other}'"))),
        }
    }
}
