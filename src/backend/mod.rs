// Backend module - thin Vulkan abstraction layer
//
// Explicit resource ownership, tracked image layouts, synchronous submits.

pub mod buffer;
pub mod commands;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod sampler;
pub mod shader;
pub mod swapchain;

pub use buffer::{IndexBuffer, UniformBuffer, VertexBuffer};
pub use commands::CommandSubmitter;
pub use device::DeviceContext;
pub use image::ImageResource;
pub use sampler::SamplerResource;
pub use swapchain::Swapchain;
