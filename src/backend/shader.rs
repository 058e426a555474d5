// Shader module loading
//
// Shaders are opaque SPIR-V blobs; nothing here compiles or inspects them.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;

use super::device::DeviceContext;

/// Wrap a SPIR-V byte blob in a shader module.
pub fn create_shader_module(ctx: &DeviceContext, bytes: &[u8]) -> Result<vk::ShaderModule> {
    let words = ash::util::read_spv(&mut std::io::Cursor::new(bytes))
        .context("Shader blob is not valid SPIR-V")?;

    let create_info = vk::ShaderModuleCreateInfo::default().code(&words);

    unsafe { ctx.device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")
}

/// Read a SPIR-V file from disk and create a shader module from it.
pub fn load_shader_module(ctx: &DeviceContext, path: impl AsRef<Path>) -> Result<vk::ShaderModule> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read shader file {:?}", path))?;
    create_shader_module(ctx, &bytes)
}
