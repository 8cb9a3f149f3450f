use super::*;
use crate::frame::RgbFrame16;

fn mosaic(width: usize, height: usize, rgb: [u16; 3]) -> Vec<u16> {
    (0..height)
        .flat_map(|y| (0..width).map(move |x| rgb[rggb_channel(x, y)]))
        .collect()
}

#[test]
fn test_rggb_layout() {
    assert_eq!(rggb_channel(0, 0), 0);
    assert_eq!(rggb_channel(1, 0), 1);
    assert_eq!(rggb_channel(0, 1), 1);
    assert_eq!(rggb_channel(1, 1), 2);
    assert_eq!(rggb_channel(2, 2), 0);
}

#[test]
fn test_normalize_stretches_to_full_range() {
    assert_eq!(normalize(&[100, 200, 300]), vec![0, 32767, 65535]);
    assert_eq!(normalize(&[7, 7, 7]), vec![0, 0, 0]);
    assert!(normalize(&[]).is_empty());
}

#[test]
fn test_debayer_recovers_flat_colour_field() {
    let data = mosaic(6, 4, [1000, 2000, 3000]);
    let rgb = debayer_rggb(6, 4, &data);

    for y in 0..4 {
        for x in 0..6 {
            assert_eq!(rgb.pixel(x, y), [1000, 2000, 3000], "pixel ({}, {})", x, y);
        }
    }
}

#[test]
fn test_debayer_interpolates_missing_sites() {
    // Only the red site at (2, 2) is lit
    let mut data = vec![0u16; 5 * 5];
    data[2 * 5 + 2] = 800;
    let rgb = debayer_rggb(5, 5, &data);

    assert_eq!(rgb.pixel(2, 2), [800, 0, 0]);
    // Green neighbour sees one of two red sites
    assert_eq!(rgb.pixel(3, 2)[0], 400);
    // Blue diagonal sees one of four red sites
    assert_eq!(rgb.pixel(3, 3)[0], 200);
}

#[test]
fn test_white_balance_moves_medians_to_mid_range() {
    let mut frame = RgbFrame16::new(3, 1);
    frame.data = vec![128, 1024, 0, 256, 2048, 0, 1024, 4096, 0];
    white_balance(&mut frame);

    assert_eq!(channel_median(&frame, 0), WHITE_BALANCE_TARGET);
    assert_eq!(channel_median(&frame, 1), WHITE_BALANCE_TARGET);
    // Values above full scale after scaling are clipped
    assert_eq!(frame.pixel(2, 0)[0], u16::MAX);
    // Zero-median channel untouched
    assert_eq!(frame.pixel(1, 0)[2], 0);
}

#[test]
fn test_even_median_averages_middle_values() {
    let mut frame = RgbFrame16::new(2, 1);
    frame.data = vec![10, 0, 0, 20, 0, 0];
    assert_eq!(channel_median(&frame, 0), 15.0);
}

#[test]
fn test_median_filter_removes_isolated_hot_pixel() {
    let mut frame = RgbFrame16::new(5, 5);
    for v in frame.data.iter_mut() {
        *v = 500;
    }
    let hot = (2 * 5 + 2) * 3 + 1;
    frame.data[hot] = 65535;

    let filtered = remove_hot_pixels(&frame);
    assert_eq!(filtered.pixel(2, 2), [500, 500, 500]);
    assert!(filtered.data.iter().all(|&v| v == 500));
}

#[test]
fn test_to_8bit_divides_by_256() {
    let mut frame = RgbFrame16::new(1, 1);
    frame.data = vec![65535, 32768, 255];
    assert_eq!(to_8bit(&frame).data, vec![255, 128, 0]);
}

#[test]
fn test_pipeline_produces_balanced_rgb() {
    let pipeline = CorrectionPipeline::new(85);
    let image = pipeline.process(8, 8, &mosaic(8, 8, [900, 1500, 600]));

    assert_eq!((image.width, image.height), (8, 8));
    assert_eq!(image.data.len(), 8 * 8 * 3);
    for px in image.data.chunks(3) {
        // Red and green medians land on mid-range, the darkest channel normalizes to zero
        assert!((127..=128).contains(&px[0]));
        assert!((127..=128).contains(&px[1]));
        assert_eq!(px[2], 0);
    }
}

#[tokio::test]
async fn test_jpeg_written_and_decodable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("night").join("frame.jpg");
    let pipeline = CorrectionPipeline::default();
    let image = pipeline.process(16, 12, &mosaic(16, 12, [100, 400, 200]));

    pipeline.save_jpeg(&path, &image).await.unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (16, 12));
}

#[tokio::test]
async fn test_raw_tiff_keeps_16_bit_samples() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raw.tif");
    let frame = RawFrame::new(
        3,
        2,
        vec![0, 1, 300, 4095, 40000, 65535],
        250,
        crate::frame::CaptureSettings::new(1_000_000, 10),
        chrono::Utc::now(),
    );

    save_raw_tiff(&path, &frame).await.unwrap();

    let decoded = image::open(&path).unwrap();
    let luma = decoded.as_luma16().unwrap();
    assert_eq!((luma.width(), luma.height()), (3, 2));
    assert_eq!(luma.as_raw(), &frame.data);
}

#[test]
fn test_raw_tiff_rejects_short_buffer() {
    let frame = RawFrame::new(
        2,
        2,
        vec![1, 2, 3, 4],
        0,
        crate::frame::CaptureSettings::new(1_000, 0),
        chrono::Utc::now(),
    );
    let mut short = frame.clone();
    short.data.pop();
    assert!(encode_raw_tiff(&frame).is_ok());
    assert!(encode_raw_tiff(&short).is_err());
}
