//! Hardware code tables.
//!
//! Record headers carry raw sample-rate, input-range, coupling and impedance
//! codes. These enums turn them into physical quantities; unknown codes map
//! to `None` because the header is written by firmware, not by us.

use std::fmt;

macro_rules! code_enum {
    (
        $(#[$meta:meta])*
        $name:ident: $repr:ty {
            $($(#[$vmeta:meta])* $variant:ident = $code:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[allow(missing_docs)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Every known variant.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Raw hardware code.
            #[must_use]
            pub const fn code(self) -> $repr {
                match self {
                    $(Self::$variant => $code),+
                }
            }

            /// Variant for a raw hardware code.
            #[must_use]
            pub fn from_code(code: $repr) -> Option<Self> {
                match code {
                    $(c if c == $code => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

code_enum! {
    /// Internal sample clock rates.
    SampleRate: u32 {
        Ksps1 = 0x01, Ksps2 = 0x02, Ksps5 = 0x04, Ksps10 = 0x08,
        Ksps20 = 0x0A, Ksps50 = 0x0C, Ksps100 = 0x0E, Ksps200 = 0x10,
        Ksps500 = 0x12, Msps1 = 0x14, Msps2 = 0x18, Msps5 = 0x1A,
        Msps10 = 0x1C, Msps20 = 0x1E, Msps25 = 0x21, Msps50 = 0x22,
        Msps100 = 0x24, Msps125 = 0x25, Msps160 = 0x26, Msps180 = 0x27,
        Msps200 = 0x28, Msps250 = 0x2B, Msps300 = 0x90, Msps350 = 0x94,
        Msps370 = 0x96, Msps400 = 0x2D, Msps500 = 0x30, Msps800 = 0x32,
        Msps1000 = 0x35, Msps1200 = 0x37, Msps1333 = 0xC0, Msps1500 = 0x3A,
        Msps1600 = 0x3B, Msps1800 = 0x3D, Msps2000 = 0x3F, Msps2400 = 0x6A,
        Msps2666 = 0xC1, Msps3000 = 0x75, Msps3600 = 0x7B, Msps4000 = 0x80,
        Msps5000 = 0xA0, Msps10000 = 0xB0,
        /// Rate set by an external user-defined clock.
        UserDefined = 0x40,
    }
}

impl SampleRate {
    /// Rate in samples per second, `None` for a user-defined clock.
    #[must_use]
    pub fn hz(self) -> Option<f64> {
        const K: f64 = 1e3;
        const M: f64 = 1e6;
        let hz = match self {
            Self::Ksps1 => K,
            Self::Ksps2 => 2.0 * K,
            Self::Ksps5 => 5.0 * K,
            Self::Ksps10 => 10.0 * K,
            Self::Ksps20 => 20.0 * K,
            Self::Ksps50 => 50.0 * K,
            Self::Ksps100 => 100.0 * K,
            Self::Ksps200 => 200.0 * K,
            Self::Ksps500 => 500.0 * K,
            Self::Msps1 => M,
            Self::Msps2 => 2.0 * M,
            Self::Msps5 => 5.0 * M,
            Self::Msps10 => 10.0 * M,
            Self::Msps20 => 20.0 * M,
            Self::Msps25 => 25.0 * M,
            Self::Msps50 => 50.0 * M,
            Self::Msps100 => 100.0 * M,
            Self::Msps125 => 125.0 * M,
            Self::Msps160 => 160.0 * M,
            Self::Msps180 => 180.0 * M,
            Self::Msps200 => 200.0 * M,
            Self::Msps250 => 250.0 * M,
            Self::Msps300 => 300.0 * M,
            Self::Msps350 => 350.0 * M,
            Self::Msps370 => 370.0 * M,
            Self::Msps400 => 400.0 * M,
            Self::Msps500 => 500.0 * M,
            Self::Msps800 => 800.0 * M,
            Self::Msps1000 => 1000.0 * M,
            Self::Msps1200 => 1200.0 * M,
            Self::Msps1333 => 4000.0 / 3.0 * M,
            Self::Msps1500 => 1500.0 * M,
            Self::Msps1600 => 1600.0 * M,
            Self::Msps1800 => 1800.0 * M,
            Self::Msps2000 => 2000.0 * M,
            Self::Msps2400 => 2400.0 * M,
            Self::Msps2666 => 8000.0 / 3.0 * M,
            Self::Msps3000 => 3000.0 * M,
            Self::Msps3600 => 3600.0 * M,
            Self::Msps4000 => 4000.0 * M,
            Self::Msps5000 => 5000.0 * M,
            Self::Msps10000 => 10000.0 * M,
            Self::UserDefined => return None,
        };
        Some(hz)
    }
}

code_enum! {
    /// Symmetric input ranges (±full scale).
    InputRange: u32 {
        Pm20mV = 0x1, Pm40mV = 0x2, Pm50mV = 0x3, Pm80mV = 0x4,
        Pm100mV = 0x5, Pm125mV = 0x28, Pm200mV = 0x6, Pm250mV = 0x30,
        Pm400mV = 0x7, Pm500mV = 0x8, Pm560mV = 0x62, Pm800mV = 0x9,
        Pm1V = 0xA, Pm1V25 = 0x21, Pm2V = 0xB, Pm2V5 = 0x25,
        Pm4V = 0xC, Pm5V = 0xD, Pm8V = 0xE, Pm10V = 0xF,
        Pm16V = 0x12, Pm20V = 0x10, Pm40V = 0x11,
    }
}

impl InputRange {
    /// Full-scale amplitude in millivolts.
    #[must_use]
    pub fn millivolts(self) -> u32 {
        match self {
            Self::Pm20mV => 20,
            Self::Pm40mV => 40,
            Self::Pm50mV => 50,
            Self::Pm80mV => 80,
            Self::Pm100mV => 100,
            Self::Pm125mV => 125,
            Self::Pm200mV => 200,
            Self::Pm250mV => 250,
            Self::Pm400mV => 400,
            Self::Pm500mV => 500,
            Self::Pm560mV => 560,
            Self::Pm800mV => 800,
            Self::Pm1V => 1_000,
            Self::Pm1V25 => 1_250,
            Self::Pm2V => 2_000,
            Self::Pm2V5 => 2_500,
            Self::Pm4V => 4_000,
            Self::Pm5V => 5_000,
            Self::Pm8V => 8_000,
            Self::Pm10V => 10_000,
            Self::Pm16V => 16_000,
            Self::Pm20V => 20_000,
            Self::Pm40V => 40_000,
        }
    }
}

impl fmt::Display for InputRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "±{} mV", self.millivolts())
    }
}

code_enum! {
    /// Input coupling.
    Coupling: u32 {
        Ac = 1,
        Dc = 2,
        Gnd = 4,
    }
}

code_enum! {
    /// Input impedance.
    Impedance: u32 {
        Ohm1M = 1,
        Ohm50 = 2,
        Ohm75 = 4,
        Ohm300 = 8,
        Ohm100 = 10,
    }
}

impl Impedance {
    /// Impedance in ohms.
    #[must_use]
    pub fn ohms(self) -> u32 {
        match self {
            Self::Ohm1M => 1_000_000,
            Self::Ohm50 => 50,
            Self::Ohm75 => 75,
            Self::Ohm100 => 100,
            Self::Ohm300 => 300,
        }
    }
}

code_enum! {
    /// Sample clock edge.
    ClockEdge: u32 {
        Rising = 0,
        Falling = 1,
    }
}

code_enum! {
    /// `AlazarGetParameter` request codes used by the data plane.
    Parameter: u32 {
        DataWidth = ats_sys::DATA_WIDTH,
        AsyncBufferSizeBytes = ats_sys::SETGET_ASYNC_BUFFSIZE_BYTES,
        AsyncBufferCount = ats_sys::SETGET_ASYNC_BUFFCOUNT,
        AsyncBuffersPending = ats_sys::GET_ASYNC_BUFFERS_PENDING,
        AsyncBuffersPendingFull = ats_sys::GET_ASYNC_BUFFERS_PENDING_FULL,
        AsyncBuffersPendingEmpty = ats_sys::GET_ASYNC_BUFFERS_PENDING_EMPTY,
        DataFormat = ats_sys::GET_DATA_FORMAT,
        SamplesPerTimestampClock = ats_sys::GET_SAMPLES_PER_TIMESTAMP_CLOCK,
        RecordsCaptured = ats_sys::GET_RECORDS_CAPTURED,
        ChannelsPerBoard = ats_sys::GET_CHANNELS_PER_BOARD,
        PackMode = ats_sys::PACK_MODE,
    }
}

code_enum! {
    /// `AlazarQueryCapability` request codes used by the data plane.
    Capability: u32 {
        SerialNumber = ats_sys::GET_SERIAL_NUMBER,
        MemorySize = ats_sys::MEMORY_SIZE,
        BoardType = ats_sys::BOARD_TYPE,
        MaxPretriggerSamples = ats_sys::GET_MAX_PRETRIGGER_SAMPLES,
        RecordFootersSupport = ats_sys::HAS_RECORD_FOOTERS_SUPPORT,
        TraditionalAutoDma = ats_sys::CAP_SUPPORTS_TRADITIONAL_AUTODMA,
        NptAutoDma = ats_sys::CAP_SUPPORTS_NPT_AUTODMA,
        MaxNptPretriggerSamples = ats_sys::CAP_MAX_NPT_PRETRIGGER_SAMPLES,
        Support8BitPacking = ats_sys::CAP_SUPPORT_8_BIT_PACKING,
        Support12BitPacking = ats_sys::CAP_SUPPORT_12_BIT_PACKING,
    }
}

/// Short name of a driver return code, for errors raised without the
/// vendor library.
#[must_use]
pub fn return_code_text(code: u32) -> &'static str {
    match code {
        ats_sys::ApiSuccess => "ApiSuccess",
        ats_sys::ApiFailed => "ApiFailed",
        ats_sys::ApiAccessDenied => "ApiAccessDenied",
        ats_sys::ApiDmaInProgress => "ApiDmaInProgress",
        ats_sys::ApiBufferNotReady => "ApiBufferNotReady",
        ats_sys::ApiWaitTimeout => "ApiWaitTimeout",
        ats_sys::ApiWaitCanceled => "ApiWaitCanceled",
        ats_sys::ApiBufferOverflow => "ApiBufferOverflow",
        ats_sys::ApiTransferComplete => "ApiTransferComplete",
        _ => "unknown return code",
    }
}
