//! Sample layout decoding.
//!
//! Turns the raw bytes of a filled buffer into an owned `[record][channel][sample]`
//! array. The output never borrows the buffer, so the buffer may be reposted
//! as soon as extraction returns.
//!
//! Planar records hold one contiguous run per channel, each with its own
//! metadata block. Interleaved records hold the metadata blocks together and
//! store samples timepoint-major: `t0c0 t0c1 … t1c0 t1c1 …`. 12-bit packed
//! records are interleaved and store two samples in every three bytes:
//!
//! ```text
//! sample0 = b0 | (b1 & 0x0F) << 8
//! sample1 = b1 >> 4 | b2 << 4
//! ```

use ndarray::{s, Array3, Axis};
use tracing::trace;

use crate::error::{AlazarError, Result};
use crate::geometry::{AcquisitionGeometry, LayoutStrategy, SampleWidth};

/// Iterate the samples of a 12-bit packed byte stream.
///
/// A trailing partial triplet is ignored.
pub fn packed12_samples(bytes: &[u8]) -> impl Iterator<Item = u16> + '_ {
    bytes.chunks_exact(3).flat_map(|triplet| {
        let [e0, e1, e2] = [triplet[0], triplet[1], triplet[2]].map(u16::from);
        [e0 | ((e1 & 0x0F) << 8), (e1 >> 4) | (e2 << 4)]
    })
}

/// Unpack a 12-bit packed byte stream.
#[must_use]
pub fn unpack_12bit(bytes: &[u8]) -> Vec<u16> {
    packed12_samples(bytes).collect()
}

/// Pack 12-bit samples two per three bytes. Bits above 12 are dropped.
///
/// # Errors
///
/// [`AlazarError::Layout`] for an odd number of samples.
pub fn pack_12bit(samples: &[u16]) -> Result<Vec<u8>> {
    if samples.len() % 2 != 0 {
        return Err(AlazarError::layout(format!(
            "12-bit packing needs an even sample count, got {}",
            samples.len()
        )));
    }
    let mut out = Vec::with_capacity(samples.len() / 2 * 3);
    for pair in samples.chunks_exact(2) {
        let (s0, s1) = (pair[0] & 0x0FFF, pair[1] & 0x0FFF);
        out.push(s0 as u8);
        out.push(((s0 >> 8) as u8) | (((s1 & 0x0F) as u8) << 4));
        out.push((s1 >> 4) as u8);
    }
    Ok(out)
}

fn decode_run<'a>(bytes: &[u8], width: SampleWidth, dst: impl Iterator<Item = &'a mut u16>) {
    match width {
        SampleWidth::Bits8 => {
            for (d, &b) in dst.zip(bytes) {
                *d = u16::from(b);
            }
        }
        SampleWidth::Bits16 => {
            for (d, pair) in dst.zip(bytes.chunks_exact(2)) {
                *d = u16::from_le_bytes([pair[0], pair[1]]);
            }
        }
        SampleWidth::Packed12 => {
            for (d, v) in dst.zip(packed12_samples(bytes)) {
                *d = v;
            }
        }
    }
}

fn encode_run<'a>(bytes: &mut [u8], width: SampleWidth, src: impl Iterator<Item = &'a u16>) -> Result<()> {
    match width {
        SampleWidth::Bits8 => {
            for (b, &v) in bytes.iter_mut().zip(src) {
                *b = v as u8;
            }
        }
        SampleWidth::Bits16 => {
            for (pair, &v) in bytes.chunks_exact_mut(2).zip(src) {
                pair.copy_from_slice(&v.to_le_bytes());
            }
        }
        SampleWidth::Packed12 => {
            let values: Vec<u16> = src.copied().collect();
            let packed = pack_12bit(&values)?;
            bytes[..packed.len()].copy_from_slice(&packed);
        }
    }
    Ok(())
}

/// Byte range of the sample data of channel `channel` in planar record `record`.
fn planar_run(geometry: &AcquisitionGeometry, record: usize, channel: usize) -> std::ops::Range<usize> {
    let start = record * geometry.record_stride()
        + channel * geometry.channel_run_bytes()
        + geometry.header_bytes();
    let len = geometry.sample_bytes_per_record() / geometry.channels();
    start..start + len
}

/// Byte range of the sample data of interleaved record `record`.
fn interleaved_run(geometry: &AcquisitionGeometry, record: usize) -> std::ops::Range<usize> {
    let start = record * geometry.record_stride()
        + geometry.header_bytes() * geometry.metadata_multiplicity();
    start..start + geometry.sample_bytes_per_record()
}

/// Extract samples in storage order.
///
/// The shape is `[record][channel][sample]` for planar layouts and
/// `[record][sample][channel]` for interleaved ones.
///
/// # Errors
///
/// [`AlazarError::Layout`] when `bytes` is shorter than the geometry.
pub fn extract_samples_native(bytes: &[u8], geometry: &AcquisitionGeometry) -> Result<Array3<u16>> {
    geometry.check_buffer_len(bytes.len())?;
    let records = geometry.records_per_buffer();
    let channels = geometry.channels();
    let samples = geometry.samples_per_record();
    let width = geometry.sample_width();

    let out = match geometry.strategy() {
        LayoutStrategy::Planar { .. } => {
            let mut out = Array3::zeros((records, channels, samples));
            for record in 0..records {
                for channel in 0..channels {
                    let run = &bytes[planar_run(geometry, record, channel)];
                    decode_run(run, width, out.slice_mut(s![record, channel, ..]).iter_mut());
                }
            }
            out
        }
        LayoutStrategy::Interleaved { .. } | LayoutStrategy::InterleavedPacked12 { .. } => {
            let mut out = Array3::zeros((records, samples, channels));
            for record in 0..records {
                let run = &bytes[interleaved_run(geometry, record)];
                decode_run(run, width, out.index_axis_mut(Axis(0), record).iter_mut());
            }
            out
        }
    };
    trace!(records, channels, samples, strategy = ?geometry.strategy(), "Extracted samples");
    Ok(out)
}

/// Extract samples as an owned `[record][channel][sample]` array.
///
/// # Errors
///
/// [`AlazarError::Layout`] when `bytes` is shorter than the geometry.
pub fn extract_samples(bytes: &[u8], geometry: &AcquisitionGeometry) -> Result<Array3<u16>> {
    let native = extract_samples_native(bytes, geometry)?;
    if geometry.interleaved() {
        Ok(native.permuted_axes([0, 2, 1]).as_standard_layout().into_owned())
    } else {
        Ok(native)
    }
}

/// Write `[record][channel][sample]` values into `bytes` using the geometry's
/// layout. Metadata regions are left untouched.
///
/// # Errors
///
/// [`AlazarError::Layout`] when the array shape does not match the geometry
/// or `bytes` is too short.
pub fn write_samples(
    samples: &Array3<u16>,
    geometry: &AcquisitionGeometry,
    bytes: &mut [u8],
) -> Result<()> {
    geometry.check_buffer_len(bytes.len())?;
    let expected = (
        geometry.records_per_buffer(),
        geometry.channels(),
        geometry.samples_per_record(),
    );
    if samples.dim() != expected {
        return Err(AlazarError::layout(format!(
            "Sample array shape {:?} does not match geometry {:?}",
            samples.dim(),
            expected
        )));
    }
    let width = geometry.sample_width();

    if geometry.interleaved() {
        for record in 0..geometry.records_per_buffer() {
            let run = &mut bytes[interleaved_run(geometry, record)];
            // [channel][sample] -> timepoint-major
            let record_view = samples.index_axis(Axis(0), record);
            encode_run(run, width, record_view.t().iter())?;
        }
    } else {
        for record in 0..geometry.records_per_buffer() {
            for channel in 0..geometry.channels() {
                let run = &mut bytes[planar_run(geometry, record, channel)];
                encode_run(run, width, samples.slice(s![record, channel, ..]).iter())?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::PackMode;
    use proptest::prelude::*;

    #[test]
    fn test_unpack_12bit_known_bytes() {
        assert_eq!(unpack_12bit(&[0x34, 0x12, 0xF0]), vec![0x234, 0xF01]);
        assert_eq!(pack_12bit(&[0x234, 0xF01]).unwrap(), vec![0x34, 0x12, 0xF0]);
    }

    #[test]
    fn test_unpack_12bit_extremes() {
        assert_eq!(unpack_12bit(&[0xFF, 0xFF, 0xFF]), vec![0xFFF, 0xFFF]);
        assert_eq!(unpack_12bit(&[0x00, 0x0F, 0x00]), vec![0xF00, 0x000]);
        assert_eq!(unpack_12bit(&[0x00, 0xF0, 0x00]), vec![0x000, 0x00F]);
        assert!(unpack_12bit(&[0x01, 0x02]).is_empty());
        assert!(pack_12bit(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_planar_decode_from_documented_byte_order() {
        // 2 records, 2 channels, 3 samples, 16-bit, no metadata.
        let geometry = AcquisitionGeometry::builder()
            .channels(2)
            .samples_per_record(3)
            .records_per_buffer(2)
            .build()
            .unwrap();
        let mut bytes = Vec::new();
        for record in 0..2u16 {
            for channel in 0..2u16 {
                for t in 0..3u16 {
                    let value = 1000 * record + 100 * channel + t;
                    bytes.extend_from_slice(&value.to_le_bytes());
                }
            }
        }

        let out = extract_samples(&bytes, &geometry).unwrap();
        assert_eq!(out.dim(), (2, 2, 3));
        for r in 0..2 {
            for c in 0..2 {
                for t in 0..3 {
                    assert_eq!(out[[r, c, t]], (1000 * r + 100 * c + t) as u16);
                }
            }
        }
    }

    #[test]
    fn test_planar_decode_skips_per_channel_headers() {
        let geometry = AcquisitionGeometry::builder()
            .channels(2)
            .samples_per_record(2)
            .records_per_buffer(1)
            .native_bits_per_sample(8)
            .record_headers(true)
            .build()
            .unwrap();
        // [hdr A (16)] a0 a1 [hdr B (16)] b0 b1
        let mut bytes = vec![0xEEu8; geometry.total_bytes()];
        bytes[16..18].copy_from_slice(&[1, 2]);
        bytes[34..36].copy_from_slice(&[3, 4]);

        let out = extract_samples(&bytes, &geometry).unwrap();
        assert_eq!(out.as_slice().unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_interleaved_decode_orders() {
        // 1 record, 2 channels, 3 samples, 8-bit, footer after the data.
        let geometry = AcquisitionGeometry::builder()
            .channels(2)
            .samples_per_record(3)
            .records_per_buffer(1)
            .native_bits_per_sample(8)
            .record_footers(true)
            .interleaved(true)
            .build()
            .unwrap();
        let mut bytes = vec![0xAAu8; geometry.total_bytes()];
        bytes[..6].copy_from_slice(&[10, 20, 11, 21, 12, 22]);

        let native = extract_samples_native(&bytes, &geometry).unwrap();
        assert_eq!(native.dim(), (1, 3, 2));
        assert_eq!(native[[0, 1, 1]], 21);

        let logical = extract_samples(&bytes, &geometry).unwrap();
        assert_eq!(logical.dim(), (1, 2, 3));
        assert_eq!(logical.as_slice().unwrap(), &[10, 11, 12, 20, 21, 22]);
    }

    #[test]
    fn test_packed12_decode_with_headers() {
        let geometry = AcquisitionGeometry::builder()
            .channels(2)
            .samples_per_record(2)
            .records_per_buffer(1)
            .pack_mode(PackMode::Bits12)
            .interleaved(true)
            .record_headers(true)
            .build()
            .unwrap();
        assert_eq!(geometry.total_bytes(), 32 + 6);
        let mut bytes = vec![0u8; geometry.total_bytes()];
        // t0: A=0x234 B=0xF01, t1: A=0x001 B=0x800
        bytes[32..].copy_from_slice(&[0x34, 0x12, 0xF0, 0x01, 0x00, 0x80]);

        let out = extract_samples(&bytes, &geometry).unwrap();
        assert_eq!(out[[0, 0, 0]], 0x234);
        assert_eq!(out[[0, 1, 0]], 0xF01);
        assert_eq!(out[[0, 0, 1]], 0x001);
        assert_eq!(out[[0, 1, 1]], 0x800);
    }

    #[test]
    fn test_short_buffer_is_layout_error() {
        let geometry = AcquisitionGeometry::builder()
            .channels(2)
            .samples_per_record(16)
            .build()
            .unwrap();
        let bytes = vec![0u8; geometry.total_bytes() / 2];
        let err = extract_samples(&bytes, &geometry).unwrap_err();
        assert!(matches!(err, AlazarError::Layout { .. }));
    }

    #[test]
    fn test_write_samples_rejects_wrong_shape() {
        let geometry = AcquisitionGeometry::builder().channels(2).samples_per_record(4).build().unwrap();
        let mut bytes = vec![0u8; geometry.total_bytes()];
        let wrong = Array3::<u16>::zeros((1, 3, 4));
        assert!(write_samples(&wrong, &geometry, &mut bytes).is_err());
    }

    fn geometry_strategy() -> impl Strategy<Value = AcquisitionGeometry> {
        (
            1usize..=6,
            1usize..=24,
            1usize..=4,
            prop_oneof![Just(PackMode::None), Just(PackMode::Bits8), Just(PackMode::Bits12)],
            prop_oneof![Just(8u32), Just(12u32), Just(16u32)],
            0u8..3,
            any::<bool>(),
        )
            .prop_filter_map("valid geometry", |(c, s, r, pack, bits, meta, interleaved)| {
                AcquisitionGeometry::builder()
                    .channels(c)
                    .samples_per_record(s)
                    .records_per_buffer(r)
                    .pack_mode(pack)
                    .native_bits_per_sample(bits)
                    .record_headers(meta == 1)
                    .record_footers(meta == 2)
                    .interleaved(interleaved)
                    .build()
                    .ok()
            })
    }

    proptest! {
        #[test]
        fn prop_write_then_extract_reproduces_samples(geometry in geometry_strategy(), seed in any::<u64>()) {
            let (r, c, s) = (
                geometry.records_per_buffer(),
                geometry.channels(),
                geometry.samples_per_record(),
            );
            let mask = (1u32 << geometry.sample_width().bits()) - 1;
            let samples = Array3::from_shape_fn((r, c, s), |(ri, ci, ti)| {
                let mixed = seed
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add((ri * 7919 + ci * 104729 + ti) as u64);
                ((mixed >> 33) as u32 & mask) as u16
            });
            let mut bytes = vec![0u8; geometry.total_bytes()];
            write_samples(&samples, &geometry, &mut bytes).unwrap();
            prop_assert_eq!(extract_samples(&bytes, &geometry).unwrap(), samples);
        }
    }
}
