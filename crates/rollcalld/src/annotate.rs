//! Marker and label drawing for recognized faces.
//!
//! Operates on a copy of the photo; the caller's image is never mutated.
//! Faces are drawn in the order given (detection order), so identical input
//! yields byte-identical output.

use crate::engine::ResolvedFace;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_circle_mut;

/// Marker and label color.
const MARKER_COLOR: Rgb<u8> = Rgb([0, 164, 235]);
/// Concentric rings drawn per marker, for a visible stroke.
const MARKER_STROKE: i32 = 3;
/// Gap between the top of the face box and the label baseline.
const LABEL_GAP: i32 = 10;
/// Pixel multiplier for the 5×7 label glyphs.
const GLYPH_SCALE: i32 = 2;

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;
/// Horizontal advance per glyph (one column of spacing).
const GLYPH_ADVANCE: i32 = GLYPH_WIDTH + 1;

/// Draw a circular marker and identity label for every resolved face onto a
/// copy of the photo.
pub fn annotate(photo: &RgbImage, faces: &[ResolvedFace]) -> RgbImage {
    let mut canvas = photo.clone();
    for face in faces {
        draw_face_marker(&mut canvas, face);
    }
    canvas
}

fn draw_face_marker(canvas: &mut RgbImage, face: &ResolvedFace) {
    let bbox = &face.bbox;

    let center = (
        (bbox.x + bbox.width / 2.0).round() as i32,
        (bbox.y + bbox.height / 2.0).round() as i32,
    );
    let radius = (bbox.width.max(bbox.height) / 2.0).round() as i32;

    for ring in 0..MARKER_STROKE {
        let r = radius + ring;
        if r > 0 {
            draw_hollow_circle_mut(canvas, center, r, MARKER_COLOR);
        }
    }

    let label_x = bbox.x.round() as i32;
    let label_y = bbox.y.round() as i32 - LABEL_GAP - GLYPH_HEIGHT * GLYPH_SCALE;
    draw_label(canvas, label_x, label_y, &face.identity);
}

/// Render a label with the built-in 5×7 glyph set, one glyph per character.
fn draw_label(canvas: &mut RgbImage, x: i32, y: i32, text: &str) {
    let mut cursor_x = x;
    for ch in text.chars() {
        draw_glyph(canvas, cursor_x, y, ch);
        cursor_x += GLYPH_ADVANCE * GLYPH_SCALE;
    }
}

fn draw_glyph(canvas: &mut RgbImage, x: i32, y: i32, ch: char) {
    let rows = glyph(ch);
    for (row, bits) in rows.iter().enumerate() {
        for col in 0..GLYPH_WIDTH {
            if (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                for dy in 0..GLYPH_SCALE {
                    for dx in 0..GLYPH_SCALE {
                        let px = x + col * GLYPH_SCALE + dx;
                        let py = y + row as i32 * GLYPH_SCALE + dy;
                        if px >= 0
                            && py >= 0
                            && px < canvas.width() as i32
                            && py < canvas.height() as i32
                        {
                            canvas.put_pixel(px as u32, py as u32, MARKER_COLOR);
                        }
                    }
                }
            }
        }
    }
}

/// 5×7 bitmap glyphs; each u8 row uses bits 4..0, MSB leftmost. Lowercase is
/// folded to uppercase, anything unmapped renders as a hollow box.
fn glyph(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
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
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        '_' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b11111],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00110, 0b00110],
        ' ' => [0b00000; 7],
        _ => [0b11111, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11111],
    }
}
