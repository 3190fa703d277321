// Resources shared by the compute and graphics tasks
//
// Each slot owns one storage image. Compute writes it through the storage
// set, graphics samples it through the sampled set of the same slot, so two
// frames in flight never touch the same image.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use crate::backend::{GpuImage, VulkanDevice};

/// Format of the compute output, matches `rgba8` in mandelbrot.comp
pub const STORAGE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

pub struct SharedResources {
    device: Arc<VulkanDevice>,
    storage_layout: vk::DescriptorSetLayout,
    sampled_layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sampler: vk::Sampler,
    storage_sets: Vec<vk::DescriptorSet>,
    sampled_sets: Vec<vk::DescriptorSet>,
    images: Vec<GpuImage>,
}

impl SharedResources {
    pub fn new(device: Arc<VulkanDevice>, slot_count: usize, extent: vk::Extent2D) -> Result<Self> {
        log::info!(
            "Creating {} storage images of {}x{}",
            slot_count,
            extent.width,
            extent.height
        );

        // Handles start null so Drop can clean up after a partial failure
        let mut shared = Self {
            device: device.clone(),
            storage_layout: vk::DescriptorSetLayout::null(),
            sampled_layout: vk::DescriptorSetLayout::null(),
            pool: vk::DescriptorPool::null(),
            sampler: vk::Sampler::null(),
            storage_sets: Vec::new(),
            sampled_sets: Vec::new(),
            images: Vec::with_capacity(slot_count),
        };

        shared.storage_layout =
            create_set_layout(&device, vk::DescriptorType::STORAGE_IMAGE, vk::ShaderStageFlags::COMPUTE)?;
        shared.sampled_layout = create_set_layout(
            &device,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        )?;

        let count = slot_count as u32;
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: count,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(count * 2)
            .pool_sizes(&pool_sizes);
        shared.pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create descriptor pool")?;

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .max_lod(0.0);
        shared.sampler =
            unsafe { device.device.create_sampler(&sampler_info, None) }.context("Failed to create sampler")?;

        shared.storage_sets = shared.allocate_sets(shared.storage_layout, slot_count)?;
        shared.sampled_sets = shared.allocate_sets(shared.sampled_layout, slot_count)?;

        for slot in 0..slot_count {
            let image = GpuImage::new(
                device.clone(),
                &format!("storage image {}", slot),
                extent,
                STORAGE_FORMAT,
                vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED,
            )?;
            shared.write_sets(slot, &image);
            shared.images.push(image);
        }

        Ok(shared)
    }

    fn allocate_sets(&self, layout: vk::DescriptorSetLayout, count: usize) -> Result<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) }.context("Failed to allocate descriptor sets")
    }

    fn write_sets(&self, slot: usize, image: &GpuImage) {
        let storage_info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: image.view(),
            image_layout: vk::ImageLayout::GENERAL,
        }];
        let sampled_info = [vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: image.view(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];

        let writes = [
            vk::WriteDescriptorSet::builder()
                .dst_set(self.storage_sets[slot])
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .image_info(&storage_info)
                .build(),
            vk::WriteDescriptorSet::builder()
                .dst_set(self.sampled_sets[slot])
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&sampled_info)
                .build(),
        ];

        unsafe { self.device.device.update_descriptor_sets(&writes, &[]) };
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    pub fn storage_layout(&self) -> vk::DescriptorSetLayout {
        self.storage_layout
    }

    pub fn sampled_layout(&self) -> vk::DescriptorSetLayout {
        self.sampled_layout
    }

    pub fn storage_set(&self, slot: usize) -> vk::DescriptorSet {
        self.storage_sets[slot]
    }

    pub fn sampled_set(&self, slot: usize) -> vk::DescriptorSet {
        self.sampled_sets[slot]
    }

    pub fn image(&self, slot: usize) -> &GpuImage {
        &self.images[slot]
    }

    pub fn slot_count(&self) -> usize {
        self.images.len()
    }
}

fn create_set_layout(
    device: &VulkanDevice,
    ty: vk::DescriptorType,
    stages: vk::ShaderStageFlags,
) -> Result<vk::DescriptorSetLayout> {
    let bindings = [vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(ty)
        .descriptor_count(1)
        .stage_flags(stages)
        .build()];
    let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

    unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
        .context("Failed to create descriptor set layout")
}

impl Drop for SharedResources {
    fn drop(&mut self) {
        // Sets and images may still be referenced by submitted frames
        if let Err(e) = self.device.wait_idle() {
            log::error!("wait_idle failed before releasing task resources: {}", e);
        }

        self.images.clear();
        unsafe {
            // Destroying the pool frees its sets
            self.device.device.destroy_descriptor_pool(self.pool, None);
            self.device.device.destroy_sampler(self.sampler, None);
            self.device.device.destroy_descriptor_set_layout(self.storage_layout, None);
            self.device.device.destroy_descriptor_set_layout(self.sampled_layout, None);
        }
    }
}
