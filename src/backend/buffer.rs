// Vertex data
//
// Interleaved position + color vertices for the triangle, uploaded once at
// startup into a host-visible buffer through the device allocator and
// immutable for the renderer's lifetime.

use anyhow::{Context, Result};
use ash::vk;
use glam::{Vec2, Vec3};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Vertex {
    pub position: Vec2,
    pub color: Vec3,
}

impl Vertex {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(std::mem::size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            // Position (location 0)
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(0)
                .build(),
            // Color (location 1), after the vec2 position
            vk::VertexInputAttributeDescription::builder()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::size_of::<Vec2>() as u32)
                .build(),
        ]
    }
}

/// One triangle: red top, green bottom-right, blue bottom-left.
pub const TRIANGLE_VERTICES: [Vertex; 3] = [
    Vertex {
        position: Vec2::new(0.0, -0.5),
        color: Vec3::new(1.0, 0.0, 0.0),
    },
    Vertex {
        position: Vec2::new(0.5, 0.5),
        color: Vec3::new(0.0, 1.0, 0.0),
    },
    Vertex {
        position: Vec2::new(-0.5, 0.5),
        color: Vec3::new(0.0, 0.0, 1.0),
    },
];

/// Host-visible vertex buffer filled at creation.
pub struct VertexBuffer {
    pub buffer: vk::Buffer,
    allocation: Option<Allocation>,
    vertex_count: u32,
    device: Arc<VulkanDevice>,
}

impl VertexBuffer {
    pub fn new(device: Arc<VulkanDevice>, vertices: &[Vertex]) -> Result<Self> {
        let size = std::mem::size_of_val(vertices) as vk::DeviceSize;

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(vk::BufferUsageFlags::VERTEX_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .context("Failed to create vertex buffer")?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name: "vertex buffer",
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .context("Failed to allocate vertex buffer memory")?;

        unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .context("Failed to bind vertex buffer memory")?;
        }

        let mapped = allocation
            .mapped_ptr()
            .context("Vertex buffer allocation is not host visible")?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                vertices.as_ptr(),
                mapped.as_ptr().cast::<Vertex>(),
                vertices.len(),
            );
        }

        log::debug!("Uploaded {} vertices ({} bytes)", vertices.len(), size);

        Ok(Self {
            buffer,
            allocation: Some(allocation),
            vertex_count: vertices.len() as u32,
            device,
        })
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

impl Drop for VertexBuffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator.lock().free(allocation) {
                log::warn!("Failed to free vertex buffer allocation: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_shader_interface() {
        assert_eq!(std::mem::size_of::<Vertex>(), 20);

        let binding = Vertex::binding_description();
        assert_eq!(binding.stride, 20);
        assert_eq!(binding.binding, 0);

        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[0].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(attributes[1].offset, 8);
        assert_eq!(attributes[1].format, vk::Format::R32G32B32_SFLOAT);
    }

    #[test]
    fn triangle_has_one_color_per_corner() {
        assert_eq!(TRIANGLE_VERTICES.len(), 3);
        assert_eq!(TRIANGLE_VERTICES[0].color, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(TRIANGLE_VERTICES[1].color, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(TRIANGLE_VERTICES[2].color, Vec3::new(0.0, 0.0, 1.0));
    }
}
