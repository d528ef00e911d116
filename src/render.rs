use crate::bitmap::Bitmap;
use crate::errors::{DaemonError, Result};
use crate::receipt::{Command, Receipt};
use crate::template::{Resolver, VariableArrayData, VariableData};
use base64::Engine;
use image::{DynamicImage, GrayImage, Luma};
use tracing::debug;

/// Paper width used when a receipt does not specify one.
pub const DEFAULT_PAPER_WIDTH: &str = "80mm";

/// Default text height in pixels (three times the 8-dot glyph cell).
const DEFAULT_TEXT_SIZE: u32 = 24;

/// Glyph cell is 8x8 dots; sizes scale it by whole multiples.
const GLYPH_CELL: u32 = 8;

/// Map a paper width label to printable pixels at 8 dots/mm.
/// Unknown labels fall back to the 80mm mapping.
pub fn paper_width_to_pixels(width: &str) -> u32 {
    match width {
        "58mm" => 384,
        "80mm" => 576,
        "112mm" => 832,
        _ => 576,
    }
}

/// Resolve a receipt's variables and rasterize its command list.
pub fn render_receipt(
    receipt: &Receipt,
    variables: VariableData,
    arrays: VariableArrayData,
) -> Result<Bitmap> {
    let commands = Resolver::new(receipt)
        .with_variables(variables)
        .with_arrays(arrays)
        .resolve()?;

    let paper_width = if receipt.paper_width.is_empty() {
        DEFAULT_PAPER_WIDTH
    } else {
        receipt.paper_width.as_str()
    };

    let mut renderer = Renderer::new(paper_width);
    renderer.render(&commands)?;
    Ok(renderer.finish())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Center,
    Right,
}

impl Align {
    fn parse(value: &str) -> Self {
        match value {
            "center" => Align::Center,
            "right" => Align::Right,
            _ => Align::Left,
        }
    }
}

/// Draws commands onto a grow-as-needed grayscale canvas, then crops to the
/// content height. Text comes from an embedded 8x8 fixed-cell font scaled by
/// whole multiples, the same scheme thermal printers use for their built-in
/// fonts.
pub struct Renderer {
    width: u32,
    canvas: GrayImage,
    cursor: u32,
}

impl Renderer {
    pub fn new(paper_width: &str) -> Self {
        let width = paper_width_to_pixels(paper_width);
        Self {
            width,
            canvas: GrayImage::from_pixel(width, 512, Luma([255])),
            cursor: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn render(&mut self, commands: &[Command]) -> Result<()> {
        for command in commands {
            self.render_command(command)?;
        }
        Ok(())
    }

    fn render_command(&mut self, command: &Command) -> Result<()> {
        match command.kind.as_str() {
            "text" => {
                self.render_text(&command.value, command.size, Align::parse(&command.align));
                Ok(())
            }
            "feed" => {
                self.feed_lines(command.lines.max(1));
                Ok(())
            }
            // The cutter runs at the end of the encoded job; mid-receipt cut
            // markers just leave a gap.
            "cut" => {
                self.feed_lines(1);
                Ok(())
            }
            "divider" => {
                self.render_divider(&command.style);
                Ok(())
            }
            "image" => self.render_image(command),
            // No barcode rasterizer in the stack; print the payload as text
            // so the receipt still carries the information.
            "barcode" | "qrcode" => {
                self.render_text(&command.value, 0, Align::Center);
                Ok(())
            }
            "item" => {
                self.render_item(command);
                Ok(())
            }
            "box" => {
                for inner in &command.commands {
                    self.render_command(inner)?;
                }
                Ok(())
            }
            other => Err(DaemonError::Validation(format!(
                "unknown command type: {other}"
            ))),
        }
    }

    /// Consume the renderer, cropping the canvas to the drawn height.
    pub fn finish(self) -> Bitmap {
        let height = self.cursor.max(GLYPH_CELL);
        let mut cropped = GrayImage::from_pixel(self.width, height, Luma([255]));
        for y in 0..height.min(self.canvas.height()) {
            for x in 0..self.width {
                cropped.put_pixel(x, y, *self.canvas.get_pixel(x, y));
            }
        }
        Bitmap::from_luma(&cropped)
    }

    fn scale_for(size: u32) -> u32 {
        let size = if size == 0 { DEFAULT_TEXT_SIZE } else { size };
        (size / GLYPH_CELL).clamp(1, 8)
    }

    fn render_text(&mut self, text: &str, size: u32, align: Align) {
        if text.is_empty() {
            return;
        }
        let scale = Self::scale_for(size);
        let cell = GLYPH_CELL * scale;
        let max_chars = (self.width / cell).max(1) as usize;

        for line in wrap_text(text, max_chars) {
            self.draw_text_line(&line, scale, align);
        }
    }

    fn draw_text_line(&mut self, line: &str, scale: u32, align: Align) {
        let cell = GLYPH_CELL * scale;
        let line_height = cell + scale;
        self.ensure(line_height);

        let text_width = line.chars().count() as u32 * cell;
        let x0 = match align {
            Align::Left => 0,
            Align::Center => self.width.saturating_sub(text_width) / 2,
            Align::Right => self.width.saturating_sub(text_width),
        };

        let y0 = self.cursor;
        for (i, ch) in line.chars().enumerate() {
            self.draw_glyph(ch, x0 + i as u32 * cell, y0, scale);
        }
        self.cursor += line_height;
    }

    fn draw_glyph(&mut self, ch: char, x0: u32, y0: u32, scale: u32) {
        let glyph = glyph_rows(ch);
        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_CELL {
                if bits & (1 << col) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let x = x0 + col * scale + dx;
                        let y = y0 + row as u32 * scale + dy;
                        if x < self.width && y < self.canvas.height() {
                            self.canvas.put_pixel(x, y, Luma([0]));
                        }
                    }
                }
            }
        }
    }

    fn feed_lines(&mut self, lines: u32) {
        let advance = lines * DEFAULT_TEXT_SIZE;
        self.ensure(advance);
        self.cursor += advance;
    }

    fn render_divider(&mut self, style: &str) {
        const PADDING: u32 = 4;
        let needed = PADDING * 2 + 6;
        self.ensure(needed);

        let y = self.cursor + PADDING;
        match style {
            "dashed" => self.draw_rule(y, 2, 8, 4),
            "dotted" => self.draw_rule(y, 2, 2, 4),
            "double" => {
                self.draw_rule(y, 2, 0, 0);
                self.draw_rule(y + 4, 2, 0, 0);
            }
            _ => self.draw_rule(y, 2, 0, 0),
        }
        self.cursor += needed;
    }

    /// Horizontal rule of `thickness` rows; `on`/`off` give the dash pattern,
    /// zero `off` means solid.
    fn draw_rule(&mut self, y0: u32, thickness: u32, on: u32, off: u32) {
        let period = on + off;
        for dy in 0..thickness {
            let y = y0 + dy;
            if y >= self.canvas.height() {
                break;
            }
            for x in 0..self.width {
                if period > 0 && x % period >= on {
                    continue;
                }
                self.canvas.put_pixel(x, y, Luma([0]));
            }
        }
    }

    fn render_image(&mut self, command: &Command) -> Result<()> {
        let img = if !command.path.is_empty() {
            image::open(&command.path)
                .map_err(|e| DaemonError::Render(format!("failed to load image {}: {e}", command.path)))?
        } else {
            let raw = base64::engine::general_purpose::STANDARD
                .decode(&command.base64)
                .map_err(|e| DaemonError::Render(format!("invalid base64 image data: {e}")))?;
            image::load_from_memory(&raw)
                .map_err(|e| DaemonError::Render(format!("failed to decode image: {e}")))?
        };

        let gray = self.fit_to_width(&img);
        let (w, h) = gray.dimensions();
        let threshold = if command.threshold == 0 {
            128
        } else {
            command.threshold.min(255) as u8
        };

        self.ensure(h);
        let x0 = (self.width - w) / 2;
        let y0 = self.cursor;
        for y in 0..h {
            for x in 0..w {
                if gray.get_pixel(x, y)[0] < threshold {
                    self.canvas.put_pixel(x0 + x, y0 + y, Luma([0]));
                }
            }
        }
        self.cursor += h;
        debug!("rendered image {}x{} at threshold {}", w, h, threshold);
        Ok(())
    }

    fn fit_to_width(&self, img: &DynamicImage) -> GrayImage {
        let (w, h) = (img.width(), img.height());
        if w > self.width {
            let scaled_h = (h as f32 * self.width as f32 / w as f32) as u32;
            img.resize(
                self.width,
                scaled_h.max(1),
                image::imageops::FilterType::Lanczos3,
            )
            .to_luma8()
        } else {
            img.to_luma8()
        }
    }

    /// One line with left- and right-justified halves. Only the text parts of
    /// each side land on the shared line; other nested commands flow below.
    fn render_item(&mut self, command: &Command) {
        let left = first_text(&command.left_side);
        let right = first_text(&command.right_side);
        let scale = Self::scale_for(0);
        let cell = GLYPH_CELL * scale;
        let line_height = cell + scale;
        self.ensure(line_height);

        let y0 = self.cursor;
        for (i, ch) in left.chars().enumerate() {
            self.draw_glyph(ch, i as u32 * cell, y0, scale);
        }
        let right_width = right.chars().count() as u32 * cell;
        let x0 = self.width.saturating_sub(right_width);
        for (i, ch) in right.chars().enumerate() {
            self.draw_glyph(ch, x0 + i as u32 * cell, y0, scale);
        }
        self.cursor += line_height;
    }

    /// Grow the canvas so `needed` more rows fit below the cursor.
    fn ensure(&mut self, needed: u32) {
        let required = self.cursor + needed;
        if required <= self.canvas.height() {
            return;
        }
        let new_height = required.max(self.canvas.height() * 2);
        let mut grown = GrayImage::from_pixel(self.width, new_height, Luma([255]));
        for y in 0..self.canvas.height() {
            for x in 0..self.width {
                grown.put_pixel(x, y, *self.canvas.get_pixel(x, y));
            }
        }
        self.canvas = grown;
    }
}

fn first_text(commands: &[Command]) -> String {
    commands
        .iter()
        .find(|command| command.kind == "text")
        .map(|command| command.value.clone())
        .unwrap_or_default()
}

/// Greedy word wrap; words longer than a line are hard-split.
fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        let current_len = current.chars().count();

        if current_len == 0 && word_len <= max_chars {
            current.push_str(word);
        } else if current_len + 1 + word_len <= max_chars {
            current.push(' ');
            current.push_str(word);
        } else {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let mut rest: Vec<char> = word.chars().collect();
            while rest.len() > max_chars {
                lines.push(rest.drain(..max_chars).collect());
            }
            current = rest.into_iter().collect();
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// 8x8 glyph rows for printable ASCII, least-significant bit leftmost.
/// The classic public-domain font8x8 set.
fn glyph_rows(ch: char) -> [u8; 8] {
    let index = (ch as usize).wrapping_sub(0x20);
    if index < FONT8X8.len() {
        FONT8X8[index]
    } else {
        // Unknown characters print as a filled block.
        [0x7E, 0x7E, 0x7E, 0x7E, 0x7E, 0x7E, 0x7E, 0x00]
    }
}

#[rustfmt::skip]
const FONT8X8: [[u8; 8]; 95] = [
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00], // space
    [0x18, 0x3C, 0x3C, 0x18, 0x18, 0x00, 0x18, 0x00], // !
    [0x36, 0x36, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00], // "
    [0x36, 0x36, 0x7F, 0x36, 0x7F, 0x36, 0x36, 0x00], // #
    [0x0C, 0x3E, 0x03, 0x1E, 0x30, 0x1F, 0x0C, 0x00], // $
    [0x00, 0x63, 0x33, 0x18, 0x0C, 0x66, 0x63, 0x00], // %
    [0x1C, 0x36, 0x1C, 0x6E, 0x3B, 0x33, 0x6E, 0x00], // &
    [0x06, 0x06, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00], // '
    [0x18, 0x0C, 0x06, 0x06, 0x06, 0x0C, 0x18, 0x00], // (
    [0x06, 0x0C, 0x18, 0x18, 0x18, 0x0C, 0x06, 0x00], // )
    [0x00, 0x66, 0x3C, 0xFF, 0x3C, 0x66, 0x00, 0x00], // *
    [0x00, 0x0C, 0x0C, 0x3F, 0x0C, 0x0C, 0x00, 0x00], // +
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C, 0x06], // ,
    [0x00, 0x00, 0x00, 0x3F, 0x00, 0x00, 0x00, 0x00], // -
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C, 0x00], // .
    [0x60, 0x30, 0x18, 0x0C, 0x06, 0x03, 0x01, 0x00], // /
    [0x3E, 0x63, 0x73, 0x7B, 0x6F, 0x67, 0x3E, 0x00], // 0
    [0x0C, 0x0E, 0x0C, 0x0C, 0x0C, 0x0C, 0x3F, 0x00], // 1
    [0x1E, 0x33, 0x30, 0x1C, 0x06, 0x33, 0x3F, 0x00], // 2
    [0x1E, 0x33, 0x30, 0x1C, 0x30, 0x33, 0x1E, 0x00], // 3
    [0x38, 0x3C, 0x36, 0x33, 0x7F, 0x30, 0x78, 0x00], // 4
    [0x3F, 0x03, 0x1F, 0x30, 0x30, 0x33, 0x1E, 0x00], // 5
    [0x1C, 0x06, 0x03, 0x1F, 0x33, 0x33, 0x1E, 0x00], // 6
    [0x3F, 0x33, 0x30, 0x18, 0x0C, 0x0C, 0x0C, 0x00], // 7
    [0x1E, 0x33, 0x33, 0x1E, 0x33, 0x33, 0x1E, 0x00], // 8
    [0x1E, 0x33, 0x33, 0x3E, 0x30, 0x18, 0x0E, 0x00], // 9
    [0x00, 0x0C, 0x0C, 0x00, 0x00, 0x0C, 0x0C, 0x00], // :
    [0x00, 0x0C, 0x0C, 0x00, 0x00, 0x0C, 0x0C, 0x06], // ;
    [0x18, 0x0C, 0x06, 0x03, 0x06, 0x0C, 0x18, 0x00], // <
    [0x00, 0x00, 0x3F, 0x00, 0x00, 0x3F, 0x00, 0x00], // =
    [0x06, 0x0C, 0x18, 0x30, 0x18, 0x0C, 0x06, 0x00], // >
    [0x1E, 0x33, 0x30, 0x18, 0x0C, 0x00, 0x0C, 0x00], // ?
    [0x3E, 0x63, 0x7B, 0x7B, 0x7B, 0x03, 0x1E, 0x00], // @
    [0x0C, 0x1E, 0x33, 0x33, 0x3F, 0x33, 0x33, 0x00], // A
    [0x3F, 0x66, 0x66, 0x3E, 0x66, 0x66, 0x3F, 0x00], // B
    [0x3C, 0x66, 0x03, 0x03, 0x03, 0x66, 0x3C, 0x00], // C
    [0x1F, 0x36, 0x66, 0x66, 0x66, 0x36, 0x1F, 0x00], // D
    [0x7F, 0x46, 0x16, 0x1E, 0x16, 0x46, 0x7F, 0x00], // E
    [0x7F, 0x46, 0x16, 0x1E, 0x16, 0x06, 0x0F, 0x00], // F
    [0x3C, 0x66, 0x03, 0x03, 0x73, 0x66, 0x7C, 0x00], // G
    [0x33, 0x33, 0x33, 0x3F, 0x33, 0x33, 0x33, 0x00], // H
    [0x1E, 0x0C, 0x0C, 0x0C, 0x0C, 0x0C, 0x1E, 0x00], // I
    [0x78, 0x30, 0x30, 0x30, 0x33, 0x33, 0x1E, 0x00], // J
    [0x67, 0x66, 0x36, 0x1E, 0x36, 0x66, 0x67, 0x00], // K
    [0x0F, 0x06, 0x06, 0x06, 0x46, 0x66, 0x7F, 0x00], // L
    [0x63, 0x77, 0x7F, 0x7F, 0x6B, 0x63, 0x63, 0x00], // M
    [0x63, 0x67, 0x6F, 0x7B, 0x73, 0x63, 0x63, 0x00], // N
    [0x1C, 0x36, 0x63, 0x63, 0x63, 0x36, 0x1C, 0x00], // O
    [0x3F, 0x66, 0x66, 0x3E, 0x06, 0x06, 0x0F, 0x00], // P
    [0x1E, 0x33, 0x33, 0x33, 0x3B, 0x1E, 0x38, 0x00], // Q
    [0x3F, 0x66, 0x66, 0x3E, 0x36, 0x66, 0x67, 0x00], // R
    [0x1E, 0x33, 0x07, 0x0E, 0x38, 0x33, 0x1E, 0x00], // S
    [0x3F, 0x2D, 0x0C, 0x0C, 0x0C, 0x0C, 0x1E, 0x00], // T
    [0x33, 0x33, 0x33, 0x33, 0x33, 0x33, 0x3F, 0x00], // U
    [0x33, 0x33, 0x33, 0x33, 0x33, 0x1E, 0x0C, 0x00], // V
    [0x63, 0x63, 0x63, 0x6B, 0x7F, 0x77, 0x63, 0x00], // W
    [0x63, 0x63, 0x36, 0x1C, 0x1C, 0x36, 0x63, 0x00], // X
    [0x33, 0x33, 0x33, 0x1E, 0x0C, 0x0C, 0x1E, 0x00], // Y
    [0x7F, 0x63, 0x31, 0x18, 0x4C, 0x66, 0x7F, 0x00], // Z
    [0x1E, 0x06, 0x06, 0x06, 0x06, 0x06, 0x1E, 0x00], // [
    [0x03, 0x06, 0x0C, 0x18, 0x30, 0x60, 0x40, 0x00], // backslash
    [0x1E, 0x18, 0x18, 0x18, 0x18, 0x18, 0x1E, 0x00], // ]
    [0x08, 0x1C, 0x36, 0x63, 0x00, 0x00, 0x00, 0x00], // ^
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF], // _
    [0x0C, 0x0C, 0x18, 0x00, 0x00, 0x00, 0x00, 0x00], // `
    [0x00, 0x00, 0x1E, 0x30, 0x3E, 0x33, 0x6E, 0x00], // a
    [0x07, 0x06, 0x06, 0x3E, 0x66, 0x66, 0x3B, 0x00], // b
    [0x00, 0x00, 0x1E, 0x33, 0x03, 0x33, 0x1E, 0x00], // c
    [0x38, 0x30, 0x30, 0x3E, 0x33, 0x33, 0x6E, 0x00], // d
    [0x00, 0x00, 0x1E, 0x33, 0x3F, 0x03, 0x1E, 0x00], // e
    [0x1C, 0x36, 0x06, 0x0F, 0x06, 0x06, 0x0F, 0x00], // f
    [0x00, 0x00, 0x6E, 0x33, 0x33, 0x3E, 0x30, 0x1F], // g
    [0x07, 0x06, 0x36, 0x6E, 0x66, 0x66, 0x67, 0x00], // h
    [0x0C, 0x00, 0x0E, 0x0C, 0x0C, 0x0C, 0x1E, 0x00], // i
    [0x30, 0x00, 0x30, 0x30, 0x30, 0x33, 0x33, 0x1E], // j
    [0x07, 0x06, 0x66, 0x36, 0x1E, 0x36, 0x67, 0x00], // k
    [0x0E, 0x0C, 0x0C, 0x0C, 0x0C, 0x0C, 0x1E, 0x00], // l
    [0x00, 0x00, 0x33, 0x7F, 0x7F, 0x6B, 0x63, 0x00], // m
    [0x00, 0x00, 0x1F, 0x33, 0x33, 0x33, 0x33, 0x00], // n
    [0x00, 0x00, 0x1E, 0x33, 0x33, 0x33, 0x1E, 0x00], // o
    [0x00, 0x00, 0x3B, 0x66, 0x66, 0x3E, 0x06, 0x0F], // p
    [0x00, 0x00, 0x6E, 0x33, 0x33, 0x3E, 0x30, 0x78], // q
    [0x00, 0x00, 0x3B, 0x6E, 0x66, 0x06, 0x0F, 0x00], // r
    [0x00, 0x00, 0x3E, 0x03, 0x1E, 0x30, 0x1F, 0x00], // s
    [0x08, 0x0C, 0x3E, 0x0C, 0x0C, 0x2C, 0x18, 0x00], // t
    [0x00, 0x00, 0x33, 0x33, 0x33, 0x33, 0x6E, 0x00], // u
    [0x00, 0x00, 0x33, 0x33, 0x33, 0x1E, 0x0C, 0x00], // v
    [0x00, 0x00, 0x63, 0x6B, 0x7F, 0x7F, 0x36, 0x00], // w
    [0x00, 0x00, 0x63, 0x36, 0x1C, 0x36, 0x63, 0x00], // x
    [0x00, 0x00, 0x33, 0x33, 0x33, 0x3E, 0x30, 0x1F], // y
    [0x00, 0x00, 0x3F, 0x19, 0x0C, 0x26, 0x3F, 0x00], // z
    [0x38, 0x0C, 0x0C, 0x07, 0x0C, 0x0C, 0x38, 0x00], // {
    [0x18, 0x18, 0x18, 0x00, 0x18, 0x18, 0x18, 0x00], // |
    [0x07, 0x0C, 0x0C, 0x38, 0x0C, 0x0C, 0x07, 0x00], // }
    [0x6E, 0x3B, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00], // ~
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_mapping_matches_paper_sizes() {
        assert_eq!(paper_width_to_pixels("58mm"), 384);
        assert_eq!(paper_width_to_pixels("80mm"), 576);
        assert_eq!(paper_width_to_pixels("112mm"), 832);
    }

    #[test]
    fn unknown_width_falls_back_to_80mm() {
        assert_eq!(paper_width_to_pixels("72mm"), 576);
        assert_eq!(paper_width_to_pixels(""), 576);
    }

    #[test]
    fn text_produces_black_pixels() {
        let mut renderer = Renderer::new("80mm");
        renderer.render(&[Command::text("Hello")]).unwrap();
        let bitmap = renderer.finish();
        assert_eq!(bitmap.width(), 576);
        let black = (0..bitmap.height())
            .flat_map(|y| (0..bitmap.width()).map(move |x| (x, y)))
            .filter(|&(x, y)| bitmap.get(x, y))
            .count();
        assert!(black > 0);
    }

    #[test]
    fn feed_advances_by_whole_lines() {
        let mut renderer = Renderer::new("58mm");
        renderer.render(&[Command::feed(3)]).unwrap();
        let bitmap = renderer.finish();
        assert_eq!(bitmap.height(), 3 * DEFAULT_TEXT_SIZE);
    }

    #[test]
    fn long_text_wraps_instead_of_clipping() {
        let mut renderer = Renderer::new("58mm");
        let long = "word ".repeat(40);
        renderer.render(&[Command::text(long.trim())]).unwrap();
        let tall = renderer.finish().height();

        let mut renderer = Renderer::new("58mm");
        renderer.render(&[Command::text("word")]).unwrap();
        let short = renderer.finish().height();

        assert!(tall > short * 3);
    }

    #[test]
    fn render_receipt_applies_paper_width() {
        let receipt = Receipt {
            version: "1.0".into(),
            paper_width: "112mm".into(),
            commands: vec![Command::text("x")],
            ..Default::default()
        };
        let bitmap =
            render_receipt(&receipt, VariableData::new(), VariableArrayData::new()).unwrap();
        assert_eq!(bitmap.width(), 832);
    }

    #[test]
    fn divider_draws_full_width_rule() {
        let mut renderer = Renderer::new("58mm");
        renderer
            .render(&[Command {
                kind: "divider".into(),
                ..Default::default()
            }])
            .unwrap();
        let bitmap = renderer.finish();
        // The solid rule's first row is entirely black.
        let y = 4;
        assert!((0..bitmap.width()).all(|x| bitmap.get(x, y)));
    }

    #[test]
    fn wrap_splits_on_word_boundaries() {
        assert_eq!(wrap_text("one two three", 7), vec!["one two", "three"]);
        assert_eq!(wrap_text("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(wrap_text("", 10), vec![""]);
    }
}
