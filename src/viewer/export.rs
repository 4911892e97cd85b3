//! PNG export of the accumulated image

use std::path::{Path, PathBuf};

use log::info;

use crate::progressive::Renderer;
use crate::surface::rgb8_len;
use crate::{Error, Result};

pub const DEFAULT_FILE_NAME: &str = "pathtracer.png";

/// Read the current frame at `width x height` and write it to `path` as PNG.
pub fn save_png(renderer: &impl Renderer, width: u32, height: u32, path: &Path) -> Result<()> {
    let _span = tracing::info_span!("save_png").entered();
    let mut buffer = vec![0u8; rgb8_len(width, height)];
    renderer.read_frame_buffer(&mut buffer, width, height)?;

    let image = image::RgbImage::from_raw(width, height, buffer)
        .ok_or_else(|| Error::other(format!("image buffer does not fit {width}x{height}")))?;
    image.save_with_format(path, image::ImageFormat::Png)?;
    info!("saved {}x{} image to {}", width, height, path.display());
    Ok(())
}

/// Ask the user where to save, starting in `last_dir` when known.
pub fn pick_save_path(last_dir: Option<&Path>) -> Option<PathBuf> {
    let mut dialog = rfd::FileDialog::new()
        .add_filter("PNG", &["png"])
        .set_file_name(DEFAULT_FILE_NAME);
    if let Some(dir) = last_dir.filter(|d| d.is_dir()) {
        dialog = dialog.set_directory(dir);
    }
    dialog.save_file().map(|p| match p.extension() {
        Some(_) => p,
        None => p.with_extension("png"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Gradient source standing in for a live renderer.
    struct Gradient;

    impl Renderer for Gradient {
        fn init(&mut self) -> Result<()> {
            Ok(())
        }
        fn destroy(&mut self) {}
        fn render(&mut self) -> Result<()> {
            Ok(())
        }
        fn set_viewport(&mut self, _: i32, _: i32, _: u32, _: u32) -> Result<()> {
            Ok(())
        }
        fn set_perspective(&mut self, _: f32, _: f32, _: f32, _: f32) -> Result<()> {
            Ok(())
        }
        fn read_frame_buffer(&self, buffer: &mut [u8], width: u32, _height: u32) -> Result<()> {
            for (i, px) in buffer.chunks_exact_mut(3).enumerate() {
                let x = (i as u32 % width) as u8;
                let y = (i as u32 / width) as u8;
                px.copy_from_slice(&[x * 10, y * 10, 0]);
            }
            Ok(())
        }
    }

    #[test]
    fn test_save_png_writes_pixels_top_row_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        save_png(&Gradient, 4, 3, &path).unwrap();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (4, 3));
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(img.get_pixel(3, 2).0, [30, 20, 0]);
    }

    #[test]
    fn test_save_png_propagates_read_errors() {
        struct Empty;
        impl Renderer for Empty {
            fn init(&mut self) -> Result<()> {
                Ok(())
            }
            fn destroy(&mut self) {}
            fn render(&mut self) -> Result<()> {
                Ok(())
            }
            fn set_viewport(&mut self, _: i32, _: i32, _: u32, _: u32) -> Result<()> {
                Ok(())
            }
            fn set_perspective(&mut self, _: f32, _: f32, _: f32, _: f32) -> Result<()> {
                Ok(())
            }
            fn read_frame_buffer(&self, _: &mut [u8], _: u32, _: u32) -> Result<()> {
                Err(Error::NotInitialized)
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        assert!(matches!(save_png(&Empty, 2, 2, &path), Err(Error::NotInitialized)));
        assert!(!path.exists());
    }
}
