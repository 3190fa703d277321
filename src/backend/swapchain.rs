// Swapchain - Window presentation
//
// Images are only ever written by the present copy, so they are created as
// transfer destinations; nothing renders into them directly.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::{Surface, VulkanDevice};
use crate::error::{Staleness, SyncError, SyncResult};
use crate::frame::PresentSurface;

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: &Surface,
        preferred_present_mode: vk::PresentModeKHR,
        width: u32,
        height: u32,
        old: Option<&Swapchain>,
    ) -> Result<Self> {
        log::info!("Creating swapchain: {}x{}", width, height);

        let surface_caps = unsafe {
            surface
                .loader
                .get_physical_device_surface_capabilities(device.physical_device, surface.surface)
        }?;

        let formats = unsafe {
            surface
                .loader
                .get_physical_device_surface_formats(device.physical_device, surface.surface)
        }?;

        let present_modes = unsafe {
            surface
                .loader
                .get_physical_device_surface_present_modes(device.physical_device, surface.surface)
        }?;

        // Choose surface format (prefer SRGB)
        let surface_format = formats
            .iter()
            .find(|f| f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .or_else(|| formats.first())
            .context("No suitable surface format")?;

        // FIFO is always supported
        let present_mode = if present_modes.contains(&preferred_present_mode) {
            preferred_present_mode
        } else {
            log::warn!("Present mode {:?} unsupported, using FIFO", preferred_present_mode);
            vk::PresentModeKHR::FIFO
        };

        log::info!("Present mode: {:?}", present_mode);

        if !surface_caps.supported_usage_flags.contains(vk::ImageUsageFlags::TRANSFER_DST) {
            anyhow::bail!("Surface images cannot be transfer destinations");
        }

        let extent = if surface_caps.current_extent.width != u32::MAX {
            surface_caps.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(surface_caps.min_image_extent.width, surface_caps.max_image_extent.width),
                height: height.clamp(surface_caps.min_image_extent.height, surface_caps.max_image_extent.height),
            }
        };

        // At least two images, one more than the minimum when allowed
        let mut image_count = (surface_caps.min_image_count + 1).max(2);
        if surface_caps.max_image_count > 0 && image_count > surface_caps.max_image_count {
            image_count = surface_caps.max_image_count;
        }

        let swapchain_loader = ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old.map_or(vk::SwapchainKHR::null(), |old| old.swapchain));

        let swapchain =
            unsafe { swapchain_loader.create_swapchain(&create_info, None) }.context("Failed to create swapchain")?;

        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain) }?;

        log::info!("Created swapchain with {} images", images.len());

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            format: surface_format.format,
            extent,
            device,
        })
    }
}

impl PresentSurface for Swapchain {
    fn images(&self) -> &[vk::Image] {
        &self.images
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn acquire_next_image(&self, timeout_ns: u64, signal: vk::Semaphore) -> SyncResult<(u32, bool)> {
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, timeout_ns, signal, vk::Fence::null())
        };

        result.map_err(|e| SyncError::from_wait(e, "swapchain image", timeout_ns))
    }

    fn present(&self, image_index: u32, wait: vk::Semaphore) -> SyncResult<bool> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.swapchain_loader
                .queue_present(self.device.graphics_queue, &present_info)
        };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(SyncError::SwapchainStale(Staleness::OutOfDate)),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
