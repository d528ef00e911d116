use crate::bitmap::Bitmap;

/// ESC/POS command bytes
const ESC: u8 = 0x1b;
const GS: u8 = 0x1d;
const LF: u8 = 0x0a;

/// Blank lines fed after the raster block so the cut lands below the image.
const FEED_BEFORE_CUT: u8 = 3;

/// ESC/POS command builder.
///
/// Stateless with respect to the printer: every emitted stream starts from
/// `initialize()` so prior jobs cannot leak formatting state.
pub struct EscposEncoder {
    buffer: Vec<u8>,
}

impl EscposEncoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Consume the builder and return the command stream.
    pub fn build(self) -> Vec<u8> {
        self.buffer
    }

    /// ESC @ - reset the printer to its power-on state
    pub fn initialize(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x40]);
        self
    }

    /// Feed n blank lines
    pub fn feed(&mut self, lines: u8) -> &mut Self {
        for _ in 0..lines {
            self.buffer.push(LF);
        }
        self
    }

    /// GS V 0 - full paper cut
    pub fn cut(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[GS, 0x56, 0x00]);
        self
    }

    /// GS v 0 - print a raster bit image at normal density.
    ///
    /// The bitmap's rows are already packed MSB-first with zero padding in the
    /// trailing byte, which is exactly the wire layout.
    pub fn raster(&mut self, bitmap: &Bitmap) -> &mut Self {
        let byte_width = bitmap.bytes_per_row() as u16;
        let height = bitmap.height() as u16;

        self.buffer.extend_from_slice(&[GS, 0x76, 0x30, 0x00]);
        self.buffer.push(byte_width as u8); // xL
        self.buffer.push((byte_width >> 8) as u8); // xH
        self.buffer.push(height as u8); // yL
        self.buffer.push((height >> 8) as u8); // yH
        self.buffer.extend_from_slice(bitmap.data());
        self
    }

    /// Write raw bytes (escape hatch for commands not in the builder)
    pub fn raw(&mut self, data: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(data);
        self
    }
}

impl Default for EscposEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a bitmap as a complete print job: initialize, raster image, feed
/// clear of the cutter, full cut.
pub fn encode_bitmap(bitmap: &Bitmap) -> Vec<u8> {
    let mut encoder = EscposEncoder::new();
    encoder
        .initialize()
        .raster(bitmap)
        .feed(FEED_BEFORE_CUT)
        .cut();
    encoder.build()
}
