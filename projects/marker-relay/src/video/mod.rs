pub mod image_dir;
pub mod writer;

use anyhow::Result;
use image::DynamicImage;

/// Frame acquisition boundary. The pipeline only ever sees decoded frames;
/// where they come from (image sequence, capture card, video file) is a
/// backend concern.
pub trait FrameSource: Send {
    fn frame_count(&self) -> Result<usize>;
    fn source_fps(&self) -> Result<f64>;
    /// Next frame in presentation order, `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<DynamicImage>>;
}
