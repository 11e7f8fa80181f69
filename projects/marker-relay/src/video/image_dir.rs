use super::FrameSource;
use anyhow::{bail, Context, Result};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Reads a lexicographically ordered image sequence from a directory.
pub struct ImageDirSource {
    frames: Vec<PathBuf>,
    cursor: usize,
    fps: f64,
}

impl ImageDirSource {
    pub fn open(dir: &Path, fps: f64) -> Result<Self> {
        if !dir.is_dir() {
            bail!("input {} is not a directory", dir.display());
        }

        let mut frames: Vec<PathBuf> = WalkDir::new(dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .and_then(|s| s.to_str())
                    .map(|s| FRAME_EXTENSIONS.contains(&s.to_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .map(|e| e.path().to_path_buf())
            .collect();
        frames.sort();

        if frames.is_empty() {
            bail!("no frames found under {}", dir.display());
        }
        tracing::info!("opened {}: {} frames at {fps} fps", dir.display(), frames.len());

        Ok(Self {
            frames,
            cursor: 0,
            fps,
        })
    }
}

impl FrameSource for ImageDirSource {
    fn frame_count(&self) -> Result<usize> {
        Ok(self.frames.len())
    }

    fn source_fps(&self) -> Result<f64> {
        Ok(self.fps)
    }

    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        let Some(path) = self.frames.get(self.cursor) else {
            return Ok(None);
        };
        let frame = image::open(path)
            .with_context(|| format!("decoding frame {}", path.display()))?;
        self.cursor += 1;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::fs;

    fn temp_frames_dir(name: &str, count: usize) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("marker-relay-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..count {
            let mut img = RgbImage::new(8, 8);
            img.put_pixel(0, 0, Rgb([i as u8, 0, 0]));
            img.save(dir.join(format!("frame_{i:03}.png"))).unwrap();
        }
        dir
    }

    #[test]
    fn reads_frames_in_order_until_exhausted() {
        let dir = temp_frames_dir("order", 3);
        let mut source = ImageDirSource::open(&dir, 30.0).unwrap();
        assert_eq!(source.frame_count().unwrap(), 3);
        assert_eq!(source.source_fps().unwrap(), 30.0);

        for i in 0..3u8 {
            let frame = source.next_frame().unwrap().unwrap();
            assert_eq!(frame.to_rgb8().get_pixel(0, 0).0[0], i);
        }
        assert!(source.next_frame().unwrap().is_none());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = temp_frames_dir("empty", 0);
        assert!(ImageDirSource::open(&dir, 30.0).is_err());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(ImageDirSource::open(Path::new("/nonexistent/frames"), 30.0).is_err());
    }
}
