//! Loading of files a configuration refers to: sampler and plugin images, raw buffer data.
//!
//! Relative paths resolve against an [`AssetRoot`], normally the directory of the shader file.
use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::flip_vertical_in_place;

use crate::error::PipelineError;

/// Decoded RGBA8 pixels, rows ordered as they should be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl LoadedImage {
    /// A single-color image, or `None` when its byte size does not fit in memory.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Option<Self> {
        let len = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(rgba.len())?;
        let pixels = rgba.iter().copied().cycle().take(len).collect();
        Some(Self {
            width,
            height,
            pixels,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to decode image {path}: {reason}")]
    Decode { path: PathBuf, reason: String },
}

/// The image decoding collaborator.
pub trait ImageLoader {
    fn load(&self, path: &Path, y_flip: bool) -> Result<LoadedImage, ImageError>;
}

/// Decodes images from disk with the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsImageLoader;

impl ImageLoader for FsImageLoader {
    fn load(&self, path: &Path, y_flip: bool) -> Result<LoadedImage, ImageError> {
        if !path.is_file() {
            return Err(ImageError::NotFound(path.to_path_buf()));
        }
        let decoded = image::open(path).map_err(|err| ImageError::Decode {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        let mut rgba = decoded.to_rgba8();
        if y_flip {
            flip_vertical_in_place(&mut rgba);
        }
        let (width, height) = rgba.dimensions();
        tracing::debug!(path = %path.display(), width, height, y_flip, "decoded image");
        Ok(LoadedImage {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }
}

/// Base directory for relative asset paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetRoot {
    root: Option<PathBuf>,
}

impl AssetRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// Root for a shader file: the directory that contains it.
    pub fn for_shader(path: &Path) -> Self {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => Self::new(parent),
            _ => Self::default(),
        }
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub(crate) fn load_image(
        &self,
        loader: &dyn ImageLoader,
        resource: &str,
        path: &Path,
        y_flip: bool,
    ) -> Result<LoadedImage, PipelineError> {
        let resolved = self.resolve(path);
        loader.load(&resolved, y_flip).map_err(|err| match err {
            ImageError::NotFound(path) => PipelineError::missing_file(resource, &path),
            other => PipelineError::allocation(resource, other),
        })
    }

    pub(crate) fn read_bytes(&self, resource: &str, path: &Path) -> Result<Vec<u8>, PipelineError> {
        let resolved = self.resolve(path);
        fs::read(&resolved).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                PipelineError::missing_file(resource, &resolved)
            } else {
                PipelineError::allocation(
                    resource,
                    format!("failed to read {}: {err}", resolved.display()),
                )
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    #[test]
    fn loads_and_flips_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stripe.png");
        let mut img = RgbaImage::new(1, 2);
        img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        img.put_pixel(0, 1, Rgba([0, 0, 255, 255]));
        img.save(&path).unwrap();

        let upright = FsImageLoader.load(&path, false).unwrap();
        assert_eq!((upright.width, upright.height), (1, 2));
        assert_eq!(&upright.pixels[..4], &[255, 0, 0, 255]);

        let flipped = FsImageLoader.load(&path, true).unwrap();
        assert_eq!(&flipped.pixels[..4], &[0, 0, 255, 255]);
    }

    #[test]
    fn solid_images_fill_every_pixel() {
        let image = LoadedImage::solid(3, 2, [1, 2, 3, 4]).unwrap();
        assert_eq!(image.pixels.len(), 24);
        assert_eq!(&image.pixels[20..], &[1, 2, 3, 4]);
        assert!(LoadedImage::solid(0, 7, [0; 4]).unwrap().pixels.is_empty());
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn oversized_solid_image_is_refused() {
        assert!(LoadedImage::solid(u32::MAX, u32::MAX, [0; 4]).is_none());
    }

    #[test]
    fn missing_image_is_not_found() {
        let err = FsImageLoader
            .load(Path::new("/definitely/not/here.png"), false)
            .unwrap_err();
        assert!(matches!(err, ImageError::NotFound(_)));
    }

    #[test]
    fn undecodable_file_is_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        fs::write(&path, b"not a png").unwrap();
        let err = FsImageLoader.load(&path, false).unwrap_err();
        assert!(matches!(err, ImageError::Decode { .. }));
    }

    #[test]
    fn relative_paths_resolve_against_shader_directory() {
        let root = AssetRoot::for_shader(Path::new("/shaders/demo/main.glsl"));
        assert_eq!(
            root.resolve(Path::new("tex/noise.png")),
            PathBuf::from("/shaders/demo/tex/noise.png")
        );
        assert_eq!(
            root.resolve(Path::new("/abs/noise.png")),
            PathBuf::from("/abs/noise.png")
        );
        assert_eq!(
            AssetRoot::for_shader(Path::new("main.glsl")).resolve(Path::new("a.png")),
            PathBuf::from("a.png")
        );
    }

    #[test]
    fn missing_buffer_file_is_allocation_error() {
        let dir = TempDir::new().unwrap();
        let err = AssetRoot::new(dir.path())
            .read_bytes("ssbo 0", Path::new("data.bin"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::ResourceAllocation { .. }));
    }
}
