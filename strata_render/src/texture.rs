use crate::backend::{GpuId, TextureDesc, TextureKind};
use crate::error::{InvalidTextureDataErr, Result, TextureLoadErr};
use snafu::{ResultExt, ensure};
use std::path::Path;
use tracing::debug;

/// RGBA8 image with its device copy.
#[derive(Debug, Clone)]
pub struct Texture {
    name: String,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    gpu: Option<GpuId>,
}

impl Texture {
    pub fn from_pixels(name: impl Into<String>, width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        ensure!(
            expected > 0 && pixels.len() == expected,
            InvalidTextureDataErr {
                expected,
                actual: pixels.len()
            }
        );

        Ok(Texture {
            name: name.into(),
            width,
            height,
            pixels,
            gpu: None,
        })
    }

    /// Decodes any format the `image` crate understands.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path).context(TextureLoadErr { path })?.into_rgba8();
        let (width, height) = image.dimensions();
        debug!("Loaded texture {} ({width}x{height})", path.display());

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_pixels(name, width, height, image.into_raw())
    }

    pub fn desc(&self) -> TextureDesc<'_> {
        TextureDesc {
            label: &self.name,
            width: self.width,
            height: self.height,
            kind: TextureKind::Rgba8,
            pixels: Some(&self.pixels),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// `None` until the texture was uploaded.
    pub fn gpu_id(&self) -> Option<GpuId> {
        self.gpu
    }

    pub(crate) fn set_gpu_id(&mut self, id: GpuId) {
        self.gpu = Some(id);
    }

    pub(crate) fn take_gpu_id(&mut self) -> Option<GpuId> {
        self.gpu.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;

    #[test]
    fn pixel_count_must_match_dimensions() {
        let err = Texture::from_pixels("short", 2, 2, vec![0; 15]).unwrap_err();
        assert!(matches!(
            err,
            RenderError::InvalidTextureData {
                expected: 16,
                actual: 15
            }
        ));

        let tex = Texture::from_pixels("ok", 2, 2, vec![255; 16]).unwrap();
        assert_eq!(tex.desc().byte_size(), 16);
        assert_eq!(tex.gpu_id(), None);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Texture::load("does/not/exist.tga").unwrap_err();
        match err {
            RenderError::TextureLoad { path, .. } => {
                assert_eq!(path, Path::new("does/not/exist.tga"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn decodes_png_from_disk() {
        let path = std::env::temp_dir().join(format!("strata-texture-{}.png", std::process::id()));
        image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();

        let tex = Texture::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!((tex.width(), tex.height()), (3, 2));
        assert_eq!(&tex.pixels()[..4], &[10, 20, 30, 255]);
    }
}
