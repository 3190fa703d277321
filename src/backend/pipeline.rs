// Pipeline creation
//
// The compute pipeline writes the storage image; the graphics pipeline is a
// full-screen triangle rendered with dynamic rendering (no render pass or
// framebuffers), with viewport and scissor set per frame.

use anyhow::{Context, Result};
use ash::vk;

use super::VulkanDevice;

/// A pipeline with its layout, destroyed together.
pub struct Pipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl Pipeline {
    pub fn destroy(&self, device: &VulkanDevice) {
        unsafe {
            device.device.destroy_pipeline(self.pipeline, None);
            device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

fn create_layout(
    device: &VulkanDevice,
    set_layout: vk::DescriptorSetLayout,
    push_constants: Option<vk::PushConstantRange>,
) -> Result<vk::PipelineLayout> {
    let set_layouts = [set_layout];
    let push_constant_ranges: Vec<_> = push_constants.into_iter().collect();

    let layout_info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&push_constant_ranges);

    unsafe { device.device.create_pipeline_layout(&layout_info, None) }.context("Failed to create pipeline layout")
}

/// Create a compute pipeline from a single shader module.
pub fn create_compute_pipeline(
    device: &VulkanDevice,
    shader: vk::ShaderModule,
    set_layout: vk::DescriptorSetLayout,
    push_constant_size: u32,
) -> Result<Pipeline> {
    let push_constant_range = vk::PushConstantRange::builder()
        .stage_flags(vk::ShaderStageFlags::COMPUTE)
        .offset(0)
        .size(push_constant_size)
        .build();
    let layout = create_layout(device, set_layout, Some(push_constant_range))?;

    let stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(shader)
        .name(c"main")
        .build();

    let pipeline_info = vk::ComputePipelineCreateInfo::builder().stage(stage).layout(layout).build();

    let pipelines = unsafe {
        device
            .device
            .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    };

    match pipelines {
        Ok(pipelines) => Ok(Pipeline {
            pipeline: pipelines[0],
            layout,
        }),
        Err((_, e)) => {
            unsafe { device.device.destroy_pipeline_layout(layout, None) };
            Err(e).context("Failed to create compute pipeline")
        }
    }
}

/// Create the full-screen triangle pipeline rendering into `color_format`.
pub fn create_fullscreen_pipeline(
    device: &VulkanDevice,
    vert_shader: vk::ShaderModule,
    frag_shader: vk::ShaderModule,
    set_layout: vk::DescriptorSetLayout,
    color_format: vk::Format,
) -> Result<Pipeline> {
    let layout = create_layout(device, set_layout, None)?;

    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_shader)
            .name(c"main")
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_shader)
            .name(c"main")
            .build(),
    ];

    // Vertices are generated in the shader
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Viewport and scissor are dynamic, only their counts are fixed here
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build()];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let color_formats = [color_format];
    let mut rendering_info = vk::PipelineRenderingCreateInfo::builder().color_attachment_formats(&color_formats);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .push_next(&mut rendering_info)
        .build();

    let pipelines = unsafe {
        device
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    };

    match pipelines {
        Ok(pipelines) => Ok(Pipeline {
            pipeline: pipelines[0],
            layout,
        }),
        Err((_, e)) => {
            unsafe { device.device.destroy_pipeline_layout(layout, None) };
            Err(e).context("Failed to create graphics pipeline")
        }
    }
}
