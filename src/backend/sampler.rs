// Sampler paired with the texture it samples

use anyhow::{Context, Result};
use ash::vk;

use super::device::DeviceContext;
use super::image::ImageResource;

/// A sampler that exclusively owns the image it samples. Fixed policy:
/// nearest filtering, repeat addressing, no anisotropy, no mipmapping,
/// no comparison.
pub struct SamplerResource {
    sampler: vk::Sampler,
    texture: ImageResource,
    device: ash::Device,
}

impl SamplerResource {
    pub fn new(ctx: &DeviceContext, texture: ImageResource) -> Result<Self> {
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::NEAREST)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .mip_lod_bias(0.0)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .compare_enable(false)
            .compare_op(vk::CompareOp::NEVER)
            .min_lod(0.0)
            .max_lod(0.0)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE)
            .unnormalized_coordinates(false);

        let sampler = unsafe { ctx.device.create_sampler(&sampler_info, None) }
            .context("Failed to create sampler")?;

        Ok(Self {
            sampler,
            texture,
            device: ctx.device.clone(),
        })
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    pub fn texture(&self) -> &ImageResource {
        &self.texture
    }
}

impl Drop for SamplerResource {
    fn drop(&mut self) {
        // The owned texture drops itself afterwards
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}
