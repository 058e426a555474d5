// GPU images with tracked layout state
//
// An ImageResource owns image + memory + view and remembers the layout the
// most recently recorded transition left it in. Transitions and copies are
// recorded on the shared setup command buffer; nothing has happened on the
// GPU until the caller submits it.

use anyhow::{Context, Result};
use ash::vk;

use super::commands::CommandSubmitter;
use super::device::DeviceContext;

pub struct ImageResource {
    extent: vk::Extent2D,
    mip_levels: u32,
    array_layers: u32,
    format: vk::Format,
    samples: vk::SampleCountFlags,
    tiling: vk::ImageTiling,
    usage: vk::ImageUsageFlags,
    properties: vk::MemoryPropertyFlags,
    layout: vk::ImageLayout,
    allocation_size: vk::DeviceSize,

    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    device: ash::Device,
}

impl ImageResource {
    /// Image backed by device-local memory (not CPU-mappable).
    #[allow(clippy::too_many_arguments)]
    pub fn device_local(
        ctx: &DeviceContext,
        extent: vk::Extent2D,
        mip_levels: u32,
        array_layers: u32,
        format: vk::Format,
        samples: vk::SampleCountFlags,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
    ) -> Result<Self> {
        Self::new(
            ctx,
            extent,
            mip_levels,
            array_layers,
            format,
            samples,
            tiling,
            usage,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
    }

    /// CPU-mappable image, used as a staging source for uploads.
    #[allow(clippy::too_many_arguments)]
    pub fn host_visible(
        ctx: &DeviceContext,
        extent: vk::Extent2D,
        mip_levels: u32,
        array_layers: u32,
        format: vk::Format,
        samples: vk::SampleCountFlags,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
    ) -> Result<Self> {
        Self::new(
            ctx,
            extent,
            mip_levels,
            array_layers,
            format,
            samples,
            tiling,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        ctx: &DeviceContext,
        extent: vk::Extent2D,
        mip_levels: u32,
        array_layers: u32,
        format: vk::Format,
        samples: vk::SampleCountFlags,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(mip_levels)
            .array_layers(array_layers)
            .samples(samples)
            .tiling(tiling)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { ctx.device.create_image(&image_info, None) }
            .context("Failed to create image")?;

        let requirements = unsafe { ctx.device.get_image_memory_requirements(image) };
        let memory_type_index = ctx
            .memory_type_index(requirements.memory_type_bits, properties)
            .context("No suitable memory type for image")?;

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { ctx.device.allocate_memory(&alloc_info, None) }
            .context("Failed to allocate image memory")?;

        unsafe { ctx.device.bind_image_memory(image, memory, 0) }
            .context("Failed to bind image memory")?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(subresource_range(aspect_mask_for_format(format)));

        let view = unsafe { ctx.device.create_image_view(&view_info, None) }
            .context("Failed to create image view")?;

        Ok(Self {
            extent,
            mip_levels,
            array_layers,
            format,
            samples,
            tiling,
            usage,
            properties,
            layout: vk::ImageLayout::UNDEFINED,
            allocation_size: requirements.size,
            image,
            memory,
            view,
            device: ctx.device.clone(),
        })
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Layout established by the most recently recorded transition.
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    pub fn aspect_mask(&self) -> vk::ImageAspectFlags {
        aspect_mask_for_format(self.format)
    }

    /// Record a transition of this image to `new_layout` on the setup
    /// command buffer and update the tracked layout.
    ///
    /// Recording and submission are decoupled: the transition takes effect
    /// only once the caller submits the setup buffer, and any read or copy
    /// that depends on the new layout must be sequenced after it.
    pub fn transition_layout(
        &mut self,
        ctx: &DeviceContext,
        commands: &mut CommandSubmitter,
        new_layout: vk::ImageLayout,
    ) -> Result<()> {
        let cmd = commands.setup_buffer(ctx)?;
        record_layout_barrier(
            &ctx.device,
            cmd,
            self.image,
            self.aspect_mask(),
            self.layout,
            new_layout,
        );
        self.layout = new_layout;
        Ok(())
    }

    /// Fill a staging image from a tightly-packed pixel buffer.
    ///
    /// The image must be linear-tiled, host-visible and flagged as a
    /// transfer source, and the buffer must match the image dimensions and
    /// channel layout exactly. Each scanline is written at the device's
    /// reported row pitch, which may be wider than `width * 4`.
    pub fn copy_from_pixels(&self, pixels: &[u8], width: u32, height: u32) -> Result<()> {
        assert_eq!(self.tiling, vk::ImageTiling::LINEAR);
        assert!(self.properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
        assert!(self.usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert!(self.extent.width == width && self.extent.height == height);
        let row_bytes = width as usize * BYTES_PER_PIXEL;
        assert_eq!(pixels.len(), row_bytes * height as usize);

        let subresource = vk::ImageSubresource::default()
            .aspect_mask(self.aspect_mask())
            .mip_level(0)
            .array_layer(0);
        let layout = unsafe {
            self.device.get_image_subresource_layout(self.image, subresource)
        };

        unsafe {
            let data = self
                .device
                .map_memory(
                    self.memory,
                    0,
                    self.allocation_size,
                    vk::MemoryMapFlags::empty(),
                )
                .context("Failed to map image memory")? as *mut u8;

            let mapped =
                std::slice::from_raw_parts_mut(data, self.allocation_size as usize);
            copy_rows(
                pixels,
                mapped,
                row_bytes,
                layout.row_pitch as usize,
                height as usize,
            );

            self.device.unmap_memory(self.memory);
        }

        Ok(())
    }

    /// Record a full-extent copy from `src` into this image on the setup
    /// command buffer.
    ///
    /// Both images are transitioned to their transfer-optimal layouts and
    /// this image is transitioned back to its prior layout afterwards. The
    /// source is left in TRANSFER_SRC_OPTIMAL: sources are expected to be
    /// disposable staging images, so callers keeping one alive restore its
    /// layout themselves.
    pub fn copy_from_image(
        &mut self,
        ctx: &DeviceContext,
        commands: &mut CommandSubmitter,
        src: &mut ImageResource,
    ) -> Result<()> {
        assert!(src.extent.width == self.extent.width && src.extent.height == self.extent.height);
        assert_eq!(src.format, self.format);
        assert!(src.usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert!(self.usage.contains(vk::ImageUsageFlags::TRANSFER_DST));

        let prior_layout = self.layout;

        src.transition_layout(ctx, commands, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)?;
        self.transition_layout(ctx, commands, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;

        let aspect_mask = self.aspect_mask();
        let subresource = vk::ImageSubresourceLayers::default()
            .aspect_mask(aspect_mask)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1);
        let region = vk::ImageCopy::default()
            .src_subresource(subresource)
            .src_offset(vk::Offset3D::default())
            .dst_subresource(subresource)
            .dst_offset(vk::Offset3D::default())
            .extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            });

        let cmd = commands.setup_buffer(ctx)?;
        unsafe {
            ctx.device.cmd_copy_image(
                cmd,
                src.image,
                src.layout,
                self.image,
                self.layout,
                &[region],
            );
        }

        self.transition_layout(ctx, commands, prior_layout)?;

        Ok(())
    }
}

impl Drop for ImageResource {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

const BYTES_PER_PIXEL: usize = 4;

/// Depth formats get a depth aspect, everything else a color aspect.
pub fn aspect_mask_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM
        | vk::Format::X8_D24_UNORM_PACK32
        | vk::Format::D32_SFLOAT
        | vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Destination access mask for a layout transition, keyed on the layout
/// being transitioned to. Layouts outside the table get no access mask.
pub fn transition_dst_access_mask(new_layout: vk::ImageLayout) -> vk::AccessFlags {
    match new_layout {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::INPUT_ATTACHMENT_READ
        }
        _ => vk::AccessFlags::empty(),
    }
}

/// Record a layout-transition barrier. The bottom-of-pipe to top-of-pipe
/// stage pair makes the barrier fully non-overlapping with surrounding
/// work; correctness over throughput.
pub fn record_layout_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(transition_dst_access_mask(new_layout))
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range(aspect_mask));

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

fn subresource_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Copy `rows` scanlines of `row_bytes` each from a tightly-packed source
/// into a destination whose rows start every `row_pitch` bytes.
fn copy_rows(src: &[u8], dst: &mut [u8], row_bytes: usize, row_pitch: usize, rows: usize) {
    debug_assert!(row_pitch >= row_bytes);
    for y in 0..rows {
        let src_row = &src[y * row_bytes..(y + 1) * row_bytes];
        let dst_row = &mut dst[y * row_pitch..y * row_pitch + row_bytes];
        dst_row.copy_from_slice(src_row);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_dst_gets_transfer_read_access() {
        assert_eq!(
            transition_dst_access_mask(vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            vk::AccessFlags::TRANSFER_READ
        );
    }

    #[test]
    fn color_attachment_gets_write_access() {
        assert_eq!(
            transition_dst_access_mask(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
    }

    #[test]
    fn depth_attachment_gets_read_write_access() {
        assert_eq!(
            transition_dst_access_mask(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
    }

    #[test]
    fn shader_read_gets_shader_and_input_access() {
        assert_eq!(
            transition_dst_access_mask(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::INPUT_ATTACHMENT_READ
        );
    }

    #[test]
    fn other_layouts_get_no_access_mask() {
        for layout in [
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ] {
            assert_eq!(transition_dst_access_mask(layout), vk::AccessFlags::empty());
        }
    }

    #[test]
    fn depth_formats_get_depth_aspect() {
        assert_eq!(
            aspect_mask_for_format(vk::Format::D16_UNORM),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_mask_for_format(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_mask_for_format(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH
        );
    }

    #[test]
    fn color_formats_get_color_aspect() {
        assert_eq!(
            aspect_mask_for_format(vk::Format::R8G8B8A8_UNORM),
            vk::ImageAspectFlags::COLOR
        );
        assert_eq!(
            aspect_mask_for_format(vk::Format::B8G8R8A8_SRGB),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn rows_land_at_pitch_offsets() {
        // 2x2 image, 4 bytes per pixel, device pitch wider than the packed row
        let src: Vec<u8> = vec![
            0x10, 0x11, 0x12, 0x13, 0x20, 0x21, 0x22, 0x23, // row 0
            0x30, 0x31, 0x32, 0x33, 0x40, 0x41, 0x42, 0x43, // row 1
        ];
        let row_bytes = 8;
        let row_pitch = 12;
        let mut dst = vec![0u8; row_pitch * 2];

        copy_rows(&src, &mut dst, row_bytes, row_pitch, 2);

        assert_eq!(&dst[0..8], &src[0..8]);
        assert_eq!(&dst[8..12], &[0, 0, 0, 0]); // padding untouched
        assert_eq!(&dst[12..20], &src[8..16]); // second row at the pitch, not at 8
    }

    #[test]
    fn packed_pitch_is_a_straight_copy() {
        let src: Vec<u8> = (0..16).collect();
        let mut dst = vec![0u8; 16];

        copy_rows(&src, &mut dst, 8, 8, 2);

        assert_eq!(dst, src);
    }
}
