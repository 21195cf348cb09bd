use std::path::PathBuf;

use passconfig::{FilterMode, WrapMode};
use serde::Deserialize;

use super::{decode_params, PluginContext};
use crate::assets::LoadedImage;
use crate::backend::GpuBackend;
use crate::error::PipelineError;
use crate::types::{ProgramId, TextureId, TextureParams, TextureTarget};

#[derive(Debug, Deserialize)]
struct TextureParamsYaml {
    name: String,
    index: u32,
    #[serde(default)]
    file: Option<PathBuf>,
    #[serde(default)]
    files: Option<[PathBuf; 6]>,
    #[serde(default)]
    wrap: WrapMode,
    #[serde(default)]
    filter: FilterMode,
    #[serde(default)]
    mipmap: bool,
    #[serde(default)]
    y_flip: bool,
}

/// A 2D texture or cubemap bound to a fixed unit and sampler uniform in every program.
#[derive(Debug)]
pub struct TexturePlugin {
    name: String,
    index: u32,
    texture: TextureId,
    target: TextureTarget,
}

impl TexturePlugin {
    pub(crate) fn configure<B: GpuBackend + ?Sized>(
        backend: &mut B,
        params: &serde_norway::Value,
        ctx: &PluginContext<'_>,
        target: TextureTarget,
    ) -> Result<Self, PipelineError> {
        let kind = match target {
            TextureTarget::Texture2d => "texture",
            TextureTarget::Cubemap => "cubemap",
        };
        let yaml: TextureParamsYaml = decode_params(kind, params)?;
        let params = TextureParams {
            wrap: yaml.wrap,
            filter: yaml.filter,
            mipmap: yaml.mipmap,
        };
        let label = format!("{kind} '{}'", yaml.name);

        let created = match target {
            TextureTarget::Texture2d => {
                let file = yaml.file.as_deref().ok_or_else(|| {
                    PipelineError::invalid(format!("texture plugin '{}' has no file", yaml.name))
                })?;
                let image = ctx.assets.load_image(ctx.images, &label, file, yaml.y_flip)?;
                backend.create_texture(&image, params)
            }
            TextureTarget::Cubemap => {
                let files = yaml.files.as_ref().ok_or_else(|| {
                    PipelineError::invalid(format!(
                        "cubemap plugin '{}' needs six files",
                        yaml.name
                    ))
                })?;
                let mut faces: Vec<LoadedImage> = Vec::with_capacity(6);
                for file in files {
                    faces.push(ctx.assets.load_image(ctx.images, &label, file, yaml.y_flip)?);
                }
                let faces: [LoadedImage; 6] = faces.try_into().map_err(|_| {
                    PipelineError::invalid(format!("cubemap plugin '{}' needs six files", yaml.name))
                })?;
                if faces
                    .iter()
                    .any(|face| (face.width, face.height) != (faces[0].width, faces[0].height))
                {
                    return Err(PipelineError::allocation(label, "cubemap faces differ in size"));
                }
                backend.create_cubemap(&faces, params)
            }
        };
        let texture = created.map_err(|err| PipelineError::allocation(label, err))?;
        Ok(Self {
            name: yaml.name,
            index: yaml.index,
            texture,
            target,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn target(&self) -> TextureTarget {
        self.target
    }

    pub(crate) fn on_bind_program<B: GpuBackend + ?Sized>(&self, backend: &mut B, program: ProgramId) {
        backend.bind_texture(program, self.index, &self.name, self.texture, self.target);
    }

    pub(crate) fn cleanup<B: GpuBackend + ?Sized>(&self, backend: &mut B) {
        backend.destroy_texture(self.texture);
    }
}
