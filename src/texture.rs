use anyhow::{Context as _, Result};
use egui::{ColorImage, Context, TextureHandle, TextureOptions};

use odocam::asset;
use odocam::state::AcquiredImage;

/// GPU copy of the acquired image, rebuilt only when the image changes.
#[derive(Default)]
pub struct PreviewTexture {
    key: Option<String>,
    texture: Option<TextureHandle>,
}

impl PreviewTexture {
    pub fn sync(&mut self, ctx: &Context, image: Option<&AcquiredImage>) {
        let Some(image) = image else {
            self.key = None;
            self.texture = None;
            return;
        };

        let key = format!("{}#{}", image.uri, image.base64.len());
        if self.key.as_deref() == Some(key.as_str()) {
            return;
        }
        self.key = Some(key);

        match decode_preview(&image.base64) {
            Ok(color_image) => match &mut self.texture {
                // Reuse existing texture to avoid reallocating on every retake
                Some(texture) if texture.size() == color_image.size => {
                    texture.set(color_image, TextureOptions::LINEAR);
                }
                _ => {
                    self.texture = Some(ctx.load_texture("odometer_preview", color_image, TextureOptions::LINEAR));
                }
            },
            Err(e) => {
                log::warn!("Failed to decode preview for {}: {:#}", image.uri, e);
                self.texture = None;
            }
        }
    }

    pub fn texture(&self) -> Option<&TextureHandle> {
        self.texture.as_ref()
    }
}

pub fn decode_preview(base64: &str) -> Result<ColorImage> {
    let bytes = asset::decode_base64(base64)?;
    let rgba = image::load_from_memory(&bytes)
        .context("Preview is not a decodable image")?
        .to_rgba8();

    let size = [rgba.width() as usize, rgba.height() as usize];
    let pixels = rgba.as_flat_samples();
    Ok(ColorImage::from_rgba_unmultiplied(size, pixels.as_slice()))
}
