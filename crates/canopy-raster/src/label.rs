use image::{Rgb, RgbImage};

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;
/// Blank columns between glyphs, in font pixels.
const ADVANCE: u32 = GLYPH_W + 1;

/// 5x7 glyph rows, bit 4 is the leftmost column.
fn glyph(c: char) -> [u8; GLYPH_H as usize] {
    match c.to_ascii_uppercase() {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        _ => [0; GLYPH_H as usize],
    }
}

/// Width in pixels of `text` drawn at `scale`.
pub fn label_width(text: &str, scale: u32) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        return 0;
    }
    (n * ADVANCE - 1) * scale
}

/// Draw `text` with its top-left corner at `(x, y)` using the built-in
/// 5x7 font, each font pixel magnified to a `scale x scale` block.
///
/// Only digits, `:`, space and the letters of the count caption have
/// glyphs; anything else renders blank. Pixels outside the canvas are
/// clipped.
pub fn draw_label(canvas: &mut RgbImage, text: &str, x: u32, y: u32, scale: u32, color: Rgb<u8>) {
    let (w, h) = canvas.dimensions();
    for (i, c) in text.chars().enumerate() {
        let gx = x as u64 + i as u64 * (ADVANCE * scale) as u64;
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_W {
                if bits & (1 << (GLYPH_W - 1 - col)) == 0 {
                    continue;
                }
                let px = gx + (col * scale) as u64;
                let py = y as u64 + (row as u32 * scale) as u64;
                for dy in 0..scale as u64 {
                    for dx in 0..scale as u64 {
                        let (cx, cy) = (px + dx, py + dy);
                        if cx < w as u64 && cy < h as u64 {
                            canvas.put_pixel(cx as u32, cy as u32, color);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);

    #[test]
    fn draws_glyph_pixels_at_origin() {
        let mut img = RgbImage::new(120, 40);
        draw_label(&mut img, "DETECTED: 7", 10, 10, 2, YELLOW);
        // Top bar of `D` starts at the label origin.
        assert_eq!(img.get_pixel(10, 10), &YELLOW);
        assert_eq!(img.get_pixel(11, 11), &YELLOW);
        // Bit 0 of the first `D` row is clear.
        assert_eq!(img.get_pixel(10 + 4 * 2, 10), &Rgb([0, 0, 0]));
        assert_eq!(img.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn width_accounts_for_spacing() {
        assert_eq!(label_width("", 3), 0);
        assert_eq!(label_width("8", 1), 5);
        assert_eq!(label_width("88", 2), 22);
    }

    #[test]
    fn clips_at_canvas_edge() {
        let mut img = RgbImage::new(12, 6);
        draw_label(&mut img, "DETECTED: 123456", 10, 4, 3, YELLOW);
        assert_eq!(img.get_pixel(11, 5), &YELLOW);
    }
}
