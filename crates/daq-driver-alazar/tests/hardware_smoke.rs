//! AlazarTech Hardware Smoke Tests
//!
//! Verifies board discovery, geometry queries and the buffer lifecycle on a
//! real board. The board must already be configured for an AutoDMA transfer
//! (clock, inputs, trigger); these tests only exercise the data plane.
//!
//! # Environment Variables
//!
//! Required:
//! - `ATS_SMOKE_TEST=1` - Enable the test suite
//!
//! Optional:
//! - `ATS_SYSTEM_ID` / `ATS_BOARD_ID` - Board to open (default: 1 / 1)
//!
//! # Running
//!
//! ```bash
//! export ATS_SMOKE_TEST=1
//! cargo nextest run --features hardware -p daq-driver-alazar -- hardware_smoke
//! ```

#![cfg(feature = "hardware")]

use std::env;
use std::sync::Arc;

use anyhow::Result;
use daq_driver_alazar::board::{driver_version, sdk_version};
use daq_driver_alazar::{
    AcquisitionGeometry, AtsBoard, BoardQuery, Capability, DmaBuffer, GeometryInputs, PackMode,
};

fn smoke_test_enabled() -> bool {
    env::var("ATS_SMOKE_TEST")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

fn env_id(name: &str) -> u32 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(1)
}

macro_rules! skip_if_disabled {
    () => {
        if !smoke_test_enabled() {
            println!("AlazarTech smoke test skipped (set ATS_SMOKE_TEST=1 to enable)");
            return Ok(());
        }
    };
}

fn open_board() -> Result<AtsBoard> {
    Ok(AtsBoard::open(env_id("ATS_SYSTEM_ID"), env_id("ATS_BOARD_ID"))?)
}

#[test]
fn board_discovery() -> Result<()> {
    skip_if_disabled!();
    println!("SDK {}, driver {}", sdk_version()?, driver_version()?);
    let board = open_board()?;
    let serial = board.query_capability(Capability::SerialNumber)?;
    println!("Board kind {} serial {}", board.kind(), serial);
    assert!(board.channel_info()?.bits_per_sample >= 8);
    Ok(())
}

#[test]
fn geometry_inputs_from_board() -> Result<()> {
    skip_if_disabled!();
    let board = open_board()?;
    let inputs = GeometryInputs::query(&board, PackMode::None)?;
    assert!(inputs.channels_per_board >= 1);
    let geometry = AcquisitionGeometry::builder()
        .channels(inputs.channels_per_board.min(2))
        .samples_per_record(1024)
        .records_per_buffer(4)
        .native_bits_per_sample(inputs.native_bits_per_sample)
        .build()?;
    println!("{geometry}");
    Ok(())
}

#[test]
fn allocate_and_release() -> Result<()> {
    skip_if_disabled!();
    let board = Arc::new(open_board()?);
    let info = board.channel_info()?;
    let geometry = AcquisitionGeometry::builder()
        .samples_per_record(4096)
        .records_per_buffer(8)
        .native_bits_per_sample(info.bits_per_sample)
        .build()?;
    let buffers = (0..4)
        .map(|_| DmaBuffer::allocate(board.clone(), geometry))
        .collect::<daq_driver_alazar::Result<Vec<_>>>()?;
    for buffer in buffers {
        assert_eq!(buffer.size_bytes(), geometry.total_bytes());
        buffer.release()?;
    }
    Ok(())
}
