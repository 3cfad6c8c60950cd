//! Skeleton overlay drawing, mirroring, and JPEG encoding.

use anyhow::{anyhow, Result};
use image::{codecs::jpeg::JpegEncoder, imageops, ImageBuffer, Rgb};

use camera_ingest::{Frame, FrameFormat};

use crate::hand::detector::{landmarks, HandLandmarks};

/// Canonical hand skeleton topology: palm ring plus the four joints of each
/// finger, matching the detector's landmark ordering.
const HAND_CONNECTIONS: [(usize, usize); 21] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (0, 5),
    (5, 6),
    (6, 7),
    (7, 8),
    (5, 9),
    (9, 10),
    (10, 11),
    (11, 12),
    (9, 13),
    (13, 14),
    (14, 15),
    (15, 16),
    (13, 17),
    (0, 17),
    (17, 18),
    (18, 19),
    (19, 20),
];

const BONE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const JOINT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const JOINT_RADIUS: i32 = 3;

/// Draw the skeleton overlay (when a hand is present), mirror the frame
/// horizontally, and JPEG-encode it.
pub(crate) fn annotate_frame(
    frame: &Frame,
    hand: Option<&HandLandmarks>,
    jpeg_quality: i32,
) -> Result<Vec<u8>> {
    let width = frame.width as u32;
    let height = frame.height as u32;
    let rgb = match frame.format {
        FrameFormat::Bgr8 => bgr_to_rgb(&frame.data),
    };
    let mut image = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_vec(width, height, rgb)
        .ok_or_else(|| anyhow!("frame buffer does not match {width}x{height}"))?;

    if let Some(hand) = hand {
        draw_skeleton(&mut image, hand);
    }

    // Mirror so the stream behaves like a front-facing mirror.
    imageops::flip_horizontal_in_place(&mut image);

    let mut buffer = Vec::new();
    let quality = jpeg_quality.clamp(1, 100) as u8;
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode_image(&image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

fn draw_skeleton(image: &mut ImageBuffer<Rgb<u8>, Vec<u8>>, hand: &HandLandmarks) {
    let width = image.width() as f32;
    let height = image.height() as f32;
    // Landmarks are nominally 0..1 but the detector may report coordinates
    // outside the image. Clamp to a small margin so the line rasteriser's
    // integer arithmetic stays well away from overflow.
    let margin = 8.0 * JOINT_RADIUS as f32;

    let pixel = |idx: usize| {
        let lm = hand.landmarks[idx];
        (
            (lm.x * width).clamp(-margin, width + margin).round() as i32,
            (lm.y * height).clamp(-margin, height + margin).round() as i32,
        )
    };

    for &(from, to) in &HAND_CONNECTIONS {
        let (x0, y0) = pixel(from);
        let (x1, y1) = pixel(to);
        draw_line(image, x0, y0, x1, y1, BONE_COLOR);
    }
    for idx in 0..landmarks::COUNT {
        let (x, y) = pixel(idx);
        fill_disc(image, x, y, JOINT_RADIUS, JOINT_COLOR);
    }
}

fn draw_line(
    image: &mut ImageBuffer<Rgb<u8>, Vec<u8>>,
    mut x0: i32,
    mut y0: i32,
    x1: i32,
    y1: i32,
    color: Rgb<u8>,
) {
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        put_pixel(image, x0, y0, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn fill_disc(image: &mut ImageBuffer<Rgb<u8>, Vec<u8>>, cx: i32, cy: i32, radius: i32, color: Rgb<u8>) {
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel(image, cx + dx, cy + dy, color);
            }
        }
    }
}

fn put_pixel(image: &mut ImageBuffer<Rgb<u8>, Vec<u8>>, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        *image.get_pixel_mut(x as u32, y as u32) = color;
    }
}

fn bgr_to_rgb(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    for chunk in input.chunks_exact(3) {
        output.push(chunk[2]);
        output.push(chunk[1]);
        output.push(chunk[0]);
    }
    output
}
