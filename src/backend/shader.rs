// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. Shaders are compiled by build.rs (when
// glslc is available) and loaded from disk at startup, so a missing compile
// surfaces as a startup error rather than a build failure.

use anyhow::{Context, Result};
use ash::util::read_spv;
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::VulkanDevice;

/// Read a compiled SPIR-V file and wrap it in a shader module.
pub fn load_shader_module(device: &VulkanDevice, path: &Path) -> Result<vk::ShaderModule> {
    let bytes = std::fs::read(path).with_context(|| {
        format!(
            "Failed to read shader {:?}. Build with glslc on PATH, or compile it manually",
            path
        )
    })?;

    let code = read_spv(&mut Cursor::new(&bytes))
        .with_context(|| format!("Shader {:?} is not valid SPIR-V", path))?;

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")
}
