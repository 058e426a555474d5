// Buffer resources - vertex, index and uniform buffers
//
// One allocation protocol for all three: create buffer, query requirements,
// select a host-visible memory type, allocate, bind at offset zero. Vertex
// and index buffers upload once at construction and never map again;
// uniform buffers re-map every frame through a scoped guard.

use anyhow::{Context, Result};
use ash::vk;

use super::device::DeviceContext;

/// Create a buffer bound to freshly allocated memory at offset zero.
fn create_buffer(
    ctx: &DeviceContext,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_properties: vk::MemoryPropertyFlags,
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let buffer_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { ctx.device.create_buffer(&buffer_info, None) }
        .context("Failed to create buffer")?;

    let requirements = unsafe { ctx.device.get_buffer_memory_requirements(buffer) };

    let memory_type_index = ctx
        .memory_type_index(requirements.memory_type_bits, memory_properties)
        .context("No suitable memory type for buffer")?;

    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    let memory = unsafe { ctx.device.allocate_memory(&alloc_info, None) }
        .context("Failed to allocate buffer memory")?;

    unsafe { ctx.device.bind_buffer_memory(buffer, memory, 0) }
        .context("Failed to bind buffer memory")?;

    Ok((buffer, memory))
}

/// Map, copy the full payload, unmap. Write-once upload path.
fn upload_bytes(ctx: &DeviceContext, memory: vk::DeviceMemory, bytes: &[u8]) -> Result<()> {
    unsafe {
        let ptr = ctx
            .device
            .map_memory(
                memory,
                0,
                bytes.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )
            .context("Failed to map buffer memory")? as *mut u8;

        ptr.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
        ctx.device.unmap_memory(memory);
    }
    Ok(())
}

fn element_count(payload_bytes: usize, stride: usize) -> u32 {
    debug_assert!(stride > 0 && payload_bytes % stride == 0);
    (payload_bytes / stride) as u32
}

/// Vertex input description: one binding plus an ordered attribute list,
/// appended by the caller after construction and handed to pipeline
/// creation.
#[derive(Clone)]
pub struct VertexLayout {
    binding: u32,
    stride: u32,
    attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexLayout {
    pub fn new(binding: u32, stride: u32) -> Self {
        Self {
            binding,
            stride,
            attributes: Vec::new(),
        }
    }

    pub fn push_attribute(&mut self, location: u32, format: vk::Format, offset: u32) {
        self.attributes.push(
            vk::VertexInputAttributeDescription::default()
                .location(location)
                .binding(self.binding)
                .format(format)
                .offset(offset),
        );
    }

    pub fn binding(&self) -> u32 {
        self.binding
    }

    pub fn binding_description(&self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::default()
            .binding(self.binding)
            .stride(self.stride)
            .input_rate(vk::VertexInputRate::VERTEX)
    }

    pub fn attributes(&self) -> &[vk::VertexInputAttributeDescription] {
        &self.attributes
    }
}

/// Vertex data uploaded once at construction.
pub struct VertexBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    vertex_count: u32,
    pub layout: VertexLayout,
    device: ash::Device,
}

impl VertexBuffer {
    /// Upload `vertices` (interleaved, `stride` bytes per vertex) into a
    /// host-visible buffer. Memory is sized to the exact payload.
    pub fn new(ctx: &DeviceContext, vertices: &[f32], binding: u32, stride: u32) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(vertices);

        let (buffer, memory) = create_buffer(
            ctx,
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        )?;
        upload_bytes(ctx, memory, bytes)?;

        Ok(Self {
            buffer,
            memory,
            vertex_count: element_count(bytes.len(), stride as usize),
            layout: VertexLayout::new(binding, stride),
            device: ctx.device.clone(),
        })
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

impl Drop for VertexBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Index data uploaded once at construction; remembers its element count
/// for indexed draws.
pub struct IndexBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    count: u32,
    device: ash::Device,
}

impl IndexBuffer {
    pub fn new(ctx: &DeviceContext, indices: &[u32]) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(indices);

        let (buffer, memory) = create_buffer(
            ctx,
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        )?;
        upload_bytes(ctx, memory, bytes)?;

        Ok(Self {
            buffer,
            memory,
            count: indices.len() as u32,
            device: ctx.device.clone(),
        })
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

impl Drop for IndexBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Uniform buffer updated once per frame through scoped mapping.
pub struct UniformBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    descriptor: vk::DescriptorBufferInfo,
    device: ash::Device,
}

impl UniformBuffer {
    /// `extra_properties` is required on top of host visibility, e.g.
    /// HOST_COHERENT so per-frame writes need no explicit flush.
    pub fn new(
        ctx: &DeviceContext,
        size: vk::DeviceSize,
        extra_properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let (buffer, memory) = create_buffer(
            ctx,
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | extra_properties,
        )?;

        let descriptor = vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(0)
            .range(size);

        Ok(Self {
            buffer,
            memory,
            size,
            descriptor,
            device: ctx.device.clone(),
        })
    }

    pub fn descriptor(&self) -> &vk::DescriptorBufferInfo {
        &self.descriptor
    }

    /// Map the buffer for writing. The mapping is released when the guard
    /// drops; overlapping maps of the same buffer are not supported.
    pub fn map(&mut self) -> Result<UniformMapping<'_>> {
        let ptr = unsafe {
            self.device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .context("Failed to map uniform buffer")?
        } as *mut u8;

        Ok(UniformMapping {
            device: &self.device,
            memory: self.memory,
            ptr,
            size: self.size as usize,
        })
    }
}

impl Drop for UniformBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Live mapping of a uniform buffer; unmaps on drop.
pub struct UniformMapping<'a> {
    device: &'a ash::Device,
    memory: vk::DeviceMemory,
    ptr: *mut u8,
    size: usize,
}

impl UniformMapping<'_> {
    pub fn write(&mut self, bytes: &[u8]) {
        assert!(bytes.len() <= self.size);
        unsafe {
            self.ptr.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());
        }
    }
}

impl Drop for UniformMapping<'_> {
    fn drop(&mut self) {
        unsafe {
            self.device.unmap_memory(self.memory);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_count_follows_stride() {
        // 4 vertices of 7 floats (28 bytes) each
        assert_eq!(element_count(4 * 28, 28), 4);
        assert_eq!(element_count(0, 28), 0);
    }

    #[test]
    fn index_count_is_payload_over_four() {
        assert_eq!(element_count(8 * 4, 4), 8);
    }

    #[test]
    fn layout_appends_attributes_in_order() {
        let mut layout = VertexLayout::new(0, 28);
        layout.push_attribute(0, vk::Format::R32G32B32_SFLOAT, 0);
        layout.push_attribute(1, vk::Format::R32G32B32A32_SFLOAT, 12);

        let attrs = layout.attributes();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].location, 0);
        assert_eq!(attrs[0].offset, 0);
        assert_eq!(attrs[1].location, 1);
        assert_eq!(attrs[1].offset, 12);
        assert!(attrs.iter().all(|a| a.binding == 0));
    }

    #[test]
    fn binding_description_carries_stride() {
        let layout = VertexLayout::new(3, 28);
        let desc = layout.binding_description();
        assert_eq!(desc.binding, 3);
        assert_eq!(desc.stride, 28);
        assert_eq!(desc.input_rate, vk::VertexInputRate::VERTEX);
    }
}
