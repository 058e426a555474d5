// Texture decoding
//
// Decodes an image file into a tightly row-packed RGBA8 buffer. The byte
// layout is expected to match the destination image format exactly; no
// conversion happens on upload.

use anyhow::{Context, Result};
use std::path::Path;

pub struct PixelData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl PixelData {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading texture {:?}", path);

        let image = image::open(path)
            .with_context(|| format!("Failed to open texture {:?}", path))?;
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        log::info!("Decoded {}x{} texture", width, height);

        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }
}
