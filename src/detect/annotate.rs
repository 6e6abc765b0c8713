use image::{Rgb, RgbImage};

use crate::detect::result::{BoundingBox, DetectionResult};

const BOX_THICKNESS: u32 = 2;

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const GLYPH_ADVANCE: u32 = GLYPH_WIDTH + 1;
/// Glyph rows plus one pixel of padding above and below.
const LABEL_HEIGHT: u32 = GLYPH_HEIGHT + 2;
const LABEL_BACKGROUND: Rgb<u8> = Rgb([24, 24, 24]);

const PALETTE: [Rgb<u8>; 6] = [
    Rgb([0, 255, 0]),
    Rgb([255, 64, 64]),
    Rgb([64, 160, 255]),
    Rgb([255, 200, 0]),
    Rgb([255, 0, 255]),
    Rgb([0, 255, 255]),
];

/// Copy `image`, outline every detection in a per-class colour and caption it
/// with `label confidence%` just above the box.
pub fn draw_detections(image: &RgbImage, result: &DetectionResult) -> RgbImage {
    let mut annotated = image.clone();
    if annotated.width() == 0 || annotated.height() == 0 {
        return annotated;
    }
    for detection in result.iter() {
        let color = PALETTE[detection.class_id % PALETTE.len()];
        draw_box(&mut annotated, &detection.bbox, color, BOX_THICKNESS);
    }
    // Captions go on top so a neighbouring outline never cuts through text.
    for detection in result.iter() {
        let color = PALETTE[detection.class_id % PALETTE.len()];
        let text = format!("{} {:.0}%", detection.label, detection.confidence * 100.0);
        let (left, top, _, _) = pixel_bounds(&annotated, &detection.bbox);
        let label_y = top.saturating_sub(LABEL_HEIGHT);
        let text_width = text.chars().count() as u32 * GLYPH_ADVANCE + 1;
        fill_rect(
            &mut annotated,
            left,
            label_y,
            left + text_width - 1,
            label_y + LABEL_HEIGHT - 1,
            LABEL_BACKGROUND,
        );
        draw_label(&mut annotated, left + 1, label_y + 1, &text, color);
    }
    annotated
}

fn pixel_bounds(image: &RgbImage, bbox: &BoundingBox) -> (u32, u32, u32, u32) {
    let (width, height) = image.dimensions();
    let clamped = bbox.clamp_to(width - 1, height - 1);
    (
        clamped.x1.round() as u32,
        clamped.y1.round() as u32,
        clamped.x2.round() as u32,
        clamped.y2.round() as u32,
    )
}

fn draw_box(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    let (left, top, right, bottom) = pixel_bounds(image, bbox);

    for t in 0..thickness {
        let y_top = (top + t).min(bottom);
        let y_bottom = bottom.saturating_sub(t).max(top);
        for x in left..=right {
            image.put_pixel(x, y_top, color);
            image.put_pixel(x, y_bottom, color);
        }
        let x_left = (left + t).min(right);
        let x_right = right.saturating_sub(t).max(left);
        for y in top..=bottom {
            image.put_pixel(x_left, y, color);
            image.put_pixel(x_right, y, color);
        }
    }
}

/// Fill the inclusive rectangle, clipped to the image.
fn fill_rect(image: &mut RgbImage, left: u32, top: u32, right: u32, bottom: u32, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    if left >= width || top >= height {
        return;
    }
    let right = right.min(width - 1);
    let bottom = bottom.min(height - 1);
    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x, y, color);
        }
    }
}

/// Draw `text` in the built-in 5x7 font. Letters are shown upper case;
/// characters without a glyph leave a blank cell.
fn draw_label(image: &mut RgbImage, x: u32, y: u32, text: &str, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    let mut cursor = x;
    for ch in text.chars().flat_map(char::to_uppercase) {
        if cursor >= width {
            break;
        }
        if let Some(rows) = glyph_bits(ch) {
            for (row, pattern) in rows.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    let (px, py) = (cursor + col, y + row as u32);
                    if px < width && py < height {
                        image.put_pixel(px, py, color);
                    }
                }
            }
        }
        cursor += GLYPH_ADVANCE;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '%' => [0b11001, 0b11010, 0b00010, 0b00100, 0b01000, 0b01011, 0b10011],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        _ => return None,
    };
    Some(rows)
}
