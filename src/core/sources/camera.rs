use std::sync::atomic::{AtomicU64, Ordering};

use super::{traits::DataSource, types::SourceResult};
use crate::register_source;

/// Default frame width in pixels. Kept small, matching the aggressive
/// downscaling a real capture pipeline applies before publishing.
const DEFAULT_WIDTH: u16 = 64;

/// Default frame height in pixels.
const DEFAULT_HEIGHT: u16 = 48;

/// Synthetic camera source producing one opaque frame per cycle.
///
/// Stands in for a real capture device: each sample is a raw byte
/// buffer with a 4-byte header (width and height as little-endian u16)
/// followed by row-major 8-bit luma values. The image is a diagonal
/// gradient that shifts with every frame, so consecutive samples differ
/// the way frames from a live camera would.
///
/// Published with the `raw` encoding; the payload passes through the
/// bridge untouched.
pub struct CameraSource {
    width: u16,
    height: u16,
    frame: AtomicU64,
}

impl CameraSource {
    /// Creates a source producing frames of the given dimensions.
    pub fn new(width: u16, height: u16) -> Self {
        CameraSource {
            width,
            height,
            frame: AtomicU64::new(0),
        }
    }

    /// Renders the frame with the gradient shifted by `offset`.
    fn render(&self, offset: u64) -> Vec<u8> {
        let width = self.width as usize;
        let height = self.height as usize;

        let mut buffer = Vec::with_capacity(4 + width * height);
        buffer.extend_from_slice(&self.width.to_le_bytes());
        buffer.extend_from_slice(&self.height.to_le_bytes());

        for row in 0..height {
            for col in 0..width {
                let luma = (row + col + offset as usize) % 256;
                buffer.push(luma as u8);
            }
        }

        buffer
    }
}

impl Default for CameraSource {
    fn default() -> Self {
        CameraSource::new(DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }
}

#[async_trait::async_trait]
impl DataSource for CameraSource {
    type Output = Vec<u8>;

    async fn sample(&self) -> SourceResult<Self::Output> {
        let offset = self.frame.fetch_add(1, Ordering::Relaxed);

        Ok(self.render(offset))
    }
}

register_source!(CameraSource, "camera");
