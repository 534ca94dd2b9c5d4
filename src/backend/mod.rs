// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Each submodule owns one bundle of handles and
// releases them in dependency order on drop.

pub mod buffer;
pub mod commands;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
