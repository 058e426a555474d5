// Swapchain - the presentable image chain
//
// Fixed policy: FIFO present mode, exclusive sharing, color-attachment
// usage, current surface extent. One outstanding frame; the back-buffer
// index is written only by acquire and read only by present.
//
// Recreating an existing swapchain is not supported - the application
// driver refuses a second creation instead of passing an old handle.

use anyhow::{Context, Result};
use ash::vk;

use super::device::DeviceContext;

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    current_image: u32,
    loader: ash::khr::swapchain::Device,
    device: ash::Device,
}

impl Swapchain {
    pub fn new(ctx: &DeviceContext, width: u32, height: u32) -> Result<Self> {
        let surface_caps = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_capabilities(ctx.physical_device, ctx.surface)
        }
        .context("Failed to query surface capabilities")?;

        let extent = if surface_caps.current_extent.width != u32::MAX {
            surface_caps.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(
                    surface_caps.min_image_extent.width,
                    surface_caps.max_image_extent.width,
                ),
                height: height.clamp(
                    surface_caps.min_image_extent.height,
                    surface_caps.max_image_extent.height,
                ),
            }
        };

        let image_count = choose_image_count(
            surface_caps.min_image_count,
            surface_caps.max_image_count,
        );
        log::info!(
            "Creating swapchain: {}x{}, {} images, FIFO",
            extent.width,
            extent.height,
            image_count
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(ctx.surface)
            .min_image_count(image_count)
            .image_format(ctx.surface_format.format)
            .image_color_space(ctx.surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = unsafe { ctx.swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let images = unsafe { ctx.swapchain_loader.get_swapchain_images(swapchain) }
            .context("Failed to enumerate swapchain images")?;
        log::info!("Swapchain delivered {} images", images.len());

        let image_views = images
            .iter()
            .map(|&image| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(ctx.surface_format.format)
                    .components(vk::ComponentMapping::default())
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                unsafe { ctx.device.create_image_view(&view_info, None) }
                    .context("Failed to create swapchain image view")
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            swapchain,
            images,
            image_views,
            format: ctx.surface_format.format,
            extent,
            current_image: 0,
            loader: ctx.swapchain_loader.clone(),
            device: ctx.device.clone(),
        })
    }

    /// Block until the presentation engine hands out the next image and
    /// update the current back-buffer index. `semaphore` is signaled once
    /// the image is actually ready to be written.
    pub fn acquire_next_image(&mut self, semaphore: vk::Semaphore) -> Result<u32> {
        let (index, _suboptimal) = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
        .context("Failed to acquire swapchain image")?;

        self.current_image = index;
        Ok(index)
    }

    /// Index written by the most recent acquire.
    pub fn current_image(&self) -> u32 {
        self.current_image
    }

    /// Image handle for the current back buffer.
    pub fn current_image_handle(&self) -> vk::Image {
        self.images[self.current_image as usize]
    }

    /// Present the current back buffer.
    pub fn present(&self, queue: vk::Queue) -> Result<()> {
        let swapchains = [self.swapchain];
        let image_indices = [self.current_image];

        let present_info = vk::PresentInfoKHR::default()
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.loader.queue_present(queue, &present_info) }
            .context("Failed to present swapchain image")?;

        Ok(())
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// min+1 images, clamped to the surface maximum when one is reported
/// (max == 0 means unlimited).
pub fn choose_image_count(min_image_count: u32, max_image_count: u32) -> u32 {
    let count = min_image_count + 1;
    if max_image_count > 0 {
        count.min(max_image_count)
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_min_plus_one_when_unbounded() {
        assert_eq!(choose_image_count(2, 0), 3);
    }

    #[test]
    fn clamps_to_reported_maximum() {
        assert_eq!(choose_image_count(2, 3), 3);
        assert_eq!(choose_image_count(3, 3), 3);
    }

    #[test]
    fn maximum_equal_to_minimum_wins() {
        assert_eq!(choose_image_count(2, 2), 2);
    }
}
