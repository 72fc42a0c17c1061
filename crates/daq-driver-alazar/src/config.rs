//! Acquisition configuration loaded with figment.
//!
//! Sources, later ones overriding earlier ones:
//! 1. Built-in defaults
//! 2. A TOML file
//! 3. Environment variables prefixed with `ATS_DAQ_`; nested keys use a
//!    double underscore (`ATS_DAQ_LOGGING__LEVEL=debug`)
//!
//! ```toml
//! channels = ["A", "B"]
//! samples_per_record = 2048
//! records_per_buffer = 16
//! buffer_count = 8
//! buffers_per_acquisition = 100
//! mode = "npt"
//! record_footers = true
//! interleave_samples = true
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::driver::{BoardQuery, GeometryInputs, DEFAULT_WAIT_TIMEOUT};
use crate::error::{AlazarError, Result};
use crate::flags::{AdmaFlags, AdmaMode, Channels, PackMode};
use crate::geometry::{AcquisitionGeometry, GeometryParams};
use crate::logging::LoggingConfig;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ATS_DAQ_";

/// One acquisition session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Channel letters to acquire.
    pub channels: Vec<String>,
    /// Samples per channel in each record.
    pub samples_per_record: usize,
    /// Records in each DMA buffer.
    pub records_per_buffer: usize,
    /// DMA buffers in the ring.
    pub buffer_count: usize,
    /// Buffers to acquire before stopping (0 = until aborted).
    pub buffers_per_acquisition: u64,
    /// AutoDMA mode.
    pub mode: AdmaMode,
    /// Wait for a trigger before the first record.
    pub external_start_capture: bool,
    /// Traditional mode only.
    pub record_headers: bool,
    /// NPT mode only.
    pub record_footers: bool,
    /// Store samples timepoint-major.
    pub interleave_samples: bool,
    /// Sample packing.
    pub pack_mode: PackMode,
    /// Overrides the bits per sample reported by the board.
    pub native_bits_per_sample: Option<u32>,
    /// Per-buffer wait timeout.
    pub wait_timeout_ms: u64,
    /// `[logging]` table.
    pub logging: LoggingConfig,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            channels: vec!["A".to_string()],
            samples_per_record: 1024,
            records_per_buffer: 10,
            buffer_count: 4,
            buffers_per_acquisition: 0,
            mode: AdmaMode::Traditional,
            external_start_capture: true,
            record_headers: false,
            record_footers: false,
            interleave_samples: false,
            pack_mode: PackMode::None,
            native_bits_per_sample: None,
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT.as_millis() as u64,
            logging: LoggingConfig::default(),
        }
    }
}

impl AcquisitionConfig {
    /// Defaults merged with `path` and the environment.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate a configuration from `path` and the environment.
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::from_figment(&Self::figment(path))?;
        debug!(?config, "Loaded acquisition configuration");
        Ok(config)
    }

    /// Extract and validate from an existing figment.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML, e.g. to write a template file.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AlazarError::config(format!("Failed to serialize configuration: {e}")))
    }

    /// Check the flag combinations the board accepts.
    pub fn validate(&self) -> Result<()> {
        self.channels()?;
        if self.record_headers && self.mode != AdmaMode::Traditional {
            return Err(AlazarError::config(
                "Record headers are only available in traditional mode",
            ));
        }
        if self.record_footers && self.mode != AdmaMode::Npt {
            return Err(AlazarError::config(
                "Record footers are only available in NPT mode",
            ));
        }
        if self.record_footers && self.pack_mode.is_packed() {
            return Err(AlazarError::config(
                "Record footers cannot be combined with sample packing",
            ));
        }
        if self.pack_mode == PackMode::Bits12 && !self.interleave_samples {
            return Err(AlazarError::config(
                "12-bit packing requires interleaved samples",
            ));
        }
        if self.buffer_count == 0 {
            return Err(AlazarError::config("buffer_count must be at least 1"));
        }
        if self.samples_per_record == 0 || self.records_per_buffer == 0 {
            return Err(AlazarError::config(
                "samples_per_record and records_per_buffer must be positive",
            ));
        }
        self.logging.level()?;
        Ok(())
    }

    /// Selected channels.
    pub fn channels(&self) -> Result<Channels> {
        self.channels.join(",").parse()
    }

    /// Transfer flags for this configuration, mode bits included.
    #[must_use]
    pub fn adma_flags(&self) -> AdmaFlags {
        let mut flags = AdmaFlags::empty().with_mode(self.mode);
        flags.set(AdmaFlags::EXTERNAL_STARTCAPTURE, self.external_start_capture);
        flags.set(AdmaFlags::ENABLE_RECORD_HEADERS, self.record_headers);
        flags.set(AdmaFlags::ENABLE_RECORD_FOOTERS, self.record_footers);
        flags.set(AdmaFlags::INTERLEAVE_SAMPLES, self.interleave_samples);
        flags
    }

    /// Per-buffer wait timeout.
    #[must_use]
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Geometry inputs for a board with `native_bits` bits per sample.
    pub fn geometry_params(&self, native_bits: u32) -> Result<GeometryParams> {
        Ok(GeometryParams {
            channels: self.channels()?.active_count(),
            samples_per_record: self.samples_per_record,
            records_per_buffer: self.records_per_buffer,
            pack_mode: self.pack_mode,
            native_bits_per_sample: self.native_bits_per_sample.unwrap_or(native_bits),
            record_headers: self.record_headers,
            record_footers: self.record_footers,
            interleaved: self.interleave_samples,
        })
    }

    /// Query `board` and compute the buffer geometry.
    pub fn geometry_for<B: BoardQuery + ?Sized>(&self, board: &B) -> Result<AcquisitionGeometry> {
        let inputs = GeometryInputs::query(board, self.pack_mode)?;
        inputs.check_channels(self.channels()?)?;
        AcquisitionGeometry::compute(&self.geometry_params(inputs.native_bits_per_sample)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;
    use crate::mock::{MockConfig, MockDigitizer};
    use figment::Jail;

    #[test]
    fn test_load_from_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "acquisition.toml",
                r#"
                channels = ["A", "C"]
                samples_per_record = 2048
                mode = "npt"
                record_footers = true
                interleave_samples = true

                [logging]
                format = "json"
                "#,
            )?;
            jail.set_env("ATS_DAQ_RECORDS_PER_BUFFER", "16");
            jail.set_env("ATS_DAQ_LOGGING__LEVEL", "debug");

            let config = AcquisitionConfig::load_from("acquisition.toml")
                .map_err(|e| e.to_string())?;
            assert_eq!(config.channels().map_err(|e| e.to_string())?, Channels::A | Channels::C);
            assert_eq!(config.samples_per_record, 2048);
            assert_eq!(config.records_per_buffer, 16);
            assert_eq!(config.buffer_count, 4);
            assert_eq!(config.mode, AdmaMode::Npt);
            assert_eq!(config.logging.level, "debug");
            assert_eq!(config.logging.format, LogFormat::Json);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = AcquisitionConfig::load_from("absent.toml").map_err(|e| e.to_string())?;
            assert_eq!(config, AcquisitionConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_toml_template_reloads() {
        Jail::expect_with(|jail| {
            let config = AcquisitionConfig {
                channels: vec!["B".to_string(), "D".to_string()],
                mode: AdmaMode::TriggeredStreaming,
                pack_mode: PackMode::Bits8,
                native_bits_per_sample: Some(8),
                ..AcquisitionConfig::default()
            };
            let text = config.to_toml().map_err(|e| e.to_string())?;
            assert!(text.contains("pack_mode = \"8-bit\""));
            jail.create_file("template.toml", &text)?;
            let reloaded = AcquisitionConfig::load_from("template.toml").map_err(|e| e.to_string())?;
            assert_eq!(reloaded, config);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_file_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("bad.toml", "mode = \"npt\"\nrecord_headers = true\n")?;
            let err = AcquisitionConfig::load_from("bad.toml").unwrap_err();
            assert!(err.is_configuration());

            jail.create_file("typo.toml", "pack_mode = \"10-bit\"\n")?;
            let err = AcquisitionConfig::load_from("typo.toml").unwrap_err();
            assert!(matches!(err, AlazarError::ConfigLoad(_)));
            Ok(())
        });
    }

    #[test]
    fn test_validate_flag_combinations() {
        let base = AcquisitionConfig::default();
        assert!(base.validate().is_ok());

        let cases = [
            AcquisitionConfig { record_footers: true, ..base.clone() },
            AcquisitionConfig {
                mode: AdmaMode::Npt,
                record_footers: true,
                pack_mode: PackMode::Bits8,
                ..base.clone()
            },
            AcquisitionConfig { pack_mode: PackMode::Bits12, ..base.clone() },
            AcquisitionConfig { buffer_count: 0, ..base.clone() },
            AcquisitionConfig { channels: vec![], ..base.clone() },
            AcquisitionConfig { channels: vec!["Z1".to_string()], ..base.clone() },
        ];
        for config in cases {
            assert!(config.validate().unwrap_err().is_configuration(), "{config:?}");
        }
    }

    #[test]
    fn test_adma_flags() {
        let config = AcquisitionConfig {
            mode: AdmaMode::Npt,
            record_footers: true,
            interleave_samples: true,
            ..AcquisitionConfig::default()
        };
        let flags = config.adma_flags();
        assert_eq!(flags.mode(), Some(AdmaMode::Npt));
        assert!(flags.contains(
            AdmaFlags::EXTERNAL_STARTCAPTURE
                | AdmaFlags::ENABLE_RECORD_FOOTERS
                | AdmaFlags::INTERLEAVE_SAMPLES
        ));
        assert!(!flags.contains(AdmaFlags::ENABLE_RECORD_HEADERS));
    }

    #[test]
    fn test_geometry_for_board() {
        let board = MockDigitizer::with_config(MockConfig {
            bits_per_sample: 12,
            channels_per_board: 2,
            ..MockConfig::default()
        });
        let config = AcquisitionConfig {
            channels: vec!["A".to_string(), "B".to_string()],
            samples_per_record: 256,
            records_per_buffer: 4,
            record_headers: true,
            ..AcquisitionConfig::default()
        };
        let geometry = config.geometry_for(&board).unwrap();
        assert_eq!(geometry.channels(), 2);
        assert_eq!(geometry.total_bytes(), 4 * (2 * 256 * 2 + 2 * 16));

        let wide = AcquisitionConfig {
            channels: vec!["C".to_string()],
            ..config.clone()
        };
        assert!(wide.geometry_for(&board).unwrap_err().is_configuration());

        let overridden = AcquisitionConfig {
            pack_mode: PackMode::Bits8,
            native_bits_per_sample: Some(8),
            ..config
        };
        assert_eq!(
            overridden.geometry_for(&board).unwrap().total_bytes(),
            4 * (2 * 256 + 2 * 16)
        );
    }
}
