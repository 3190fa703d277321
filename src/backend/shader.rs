// Shader module loading
//
// Vulkan uses SPIR-V bytecode for shaders. build.rs compiles the GLSL
// sources next to themselves; modules are loaded from disk at startup.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;

use super::VulkanDevice;

/// Create a shader module from SPIR-V bytes.
pub fn create_shader_module(device: &VulkanDevice, code: &[u8]) -> Result<vk::ShaderModule> {
    // read_spv checks the size and copies into 4-byte aligned words
    let words = ash::util::read_spv(&mut std::io::Cursor::new(code)).context("Invalid SPIR-V")?;

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

    unsafe { device.device.create_shader_module(&create_info, None) }.context("Failed to create shader module")
}

/// Load a compiled shader from disk.
pub fn load_shader_module<P: AsRef<Path>>(device: &VulkanDevice, path: P) -> Result<vk::ShaderModule> {
    let path = path.as_ref();
    let code = std::fs::read(path).with_context(|| format!("Failed to read shader {:?} (is glslc installed?)", path))?;
    let module = create_shader_module(device, &code).with_context(|| format!("Failed to load shader {:?}", path))?;
    log::debug!("Loaded shader {:?}", path);
    Ok(module)
}
