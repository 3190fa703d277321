// Validation diagnostics
//
// The debug messenger callback receives a pointer to the device-owned sink
// through its user-data field, so messages are routed per device instead
// of through process-wide state.

use ash::vk;
use std::ffi::{c_void, CStr};

/// Severity of a validation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Verbose,
    Info,
    Warning,
    Error,
}

impl From<vk::DebugUtilsMessageSeverityFlagsEXT> for Severity {
    fn from(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            Severity::Error
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            Severity::Warning
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            Severity::Info
        } else {
            Severity::Verbose
        }
    }
}

/// A Vulkan object referenced by a validation message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedObject {
    pub object_type: vk::ObjectType,
    pub handle: u64,
    pub name: Option<String>,
}

impl std::fmt::Display for ReportedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {:#x}", object_type_name(self.object_type), self.handle)?;
        if let Some(name) = &self.name {
            write!(f, " \"{}\"", name)?;
        }
        Ok(())
    }
}

/// Receiver of validation layer messages.
pub trait DiagnosticsSink: Send + Sync {
    fn report(&self, severity: Severity, message: &str, objects: &[ReportedObject]);
}

/// Forwards validation messages to the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink;

impl DiagnosticsSink for LogSink {
    fn report(&self, severity: Severity, message: &str, objects: &[ReportedObject]) {
        let level = match severity {
            Severity::Error => log::Level::Error,
            Severity::Warning => log::Level::Warn,
            Severity::Info => log::Level::Debug,
            Severity::Verbose => log::Level::Trace,
        };
        log::log!(level, "[Vulkan] {}", message);
        for object in objects {
            log::log!(level, "[Vulkan]   object: {}", object);
        }
    }
}

/// Human readable name of a Vulkan object type.
pub fn object_type_name(object_type: vk::ObjectType) -> &'static str {
    match object_type {
        vk::ObjectType::INSTANCE => "Instance",
        vk::ObjectType::PHYSICAL_DEVICE => "PhysicalDevice",
        vk::ObjectType::DEVICE => "Device",
        vk::ObjectType::QUEUE => "Queue",
        vk::ObjectType::SEMAPHORE => "Semaphore",
        vk::ObjectType::COMMAND_BUFFER => "CommandBuffer",
        vk::ObjectType::FENCE => "Fence",
        vk::ObjectType::DEVICE_MEMORY => "DeviceMemory",
        vk::ObjectType::BUFFER => "Buffer",
        vk::ObjectType::IMAGE => "Image",
        vk::ObjectType::EVENT => "Event",
        vk::ObjectType::QUERY_POOL => "QueryPool",
        vk::ObjectType::BUFFER_VIEW => "BufferView",
        vk::ObjectType::IMAGE_VIEW => "ImageView",
        vk::ObjectType::SHADER_MODULE => "ShaderModule",
        vk::ObjectType::PIPELINE_CACHE => "PipelineCache",
        vk::ObjectType::PIPELINE_LAYOUT => "PipelineLayout",
        vk::ObjectType::RENDER_PASS => "RenderPass",
        vk::ObjectType::PIPELINE => "Pipeline",
        vk::ObjectType::DESCRIPTOR_SET_LAYOUT => "DescriptorSetLayout",
        vk::ObjectType::SAMPLER => "Sampler",
        vk::ObjectType::DESCRIPTOR_POOL => "DescriptorPool",
        vk::ObjectType::DESCRIPTOR_SET => "DescriptorSet",
        vk::ObjectType::FRAMEBUFFER => "Framebuffer",
        vk::ObjectType::COMMAND_POOL => "CommandPool",
        vk::ObjectType::SURFACE_KHR => "SurfaceKHR",
        vk::ObjectType::SWAPCHAIN_KHR => "SwapchainKHR",
        vk::ObjectType::DEBUG_UTILS_MESSENGER_EXT => "DebugUtilsMessengerEXT",
        _ => "Unknown",
    }
}

/// Messenger create info routing into `sink`.
///
/// The sink must outlive the messenger created from this info.
pub(crate) fn messenger_create_info(
    sink: &Box<dyn DiagnosticsSink>,
) -> vk::DebugUtilsMessengerCreateInfoEXTBuilder<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .user_data(sink as *const Box<dyn DiagnosticsSink> as *mut c_void)
}

unsafe fn objects_of(data: &vk::DebugUtilsMessengerCallbackDataEXT) -> Vec<ReportedObject> {
    if data.p_objects.is_null() || data.object_count == 0 {
        return Vec::new();
    }
    std::slice::from_raw_parts(data.p_objects, data.object_count as usize)
        .iter()
        .map(|object| ReportedObject {
            object_type: object.object_type,
            handle: object.object_handle,
            name: (!object.p_object_name.is_null())
                .then(|| CStr::from_ptr(object.p_object_name).to_string_lossy().into_owned()),
        })
        .collect()
}

pub(crate) unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || p_user_data.is_null() {
        return vk::FALSE;
    }
    let data = &*p_callback_data;
    let message = if data.p_message.is_null() {
        "<no message>".into()
    } else {
        CStr::from_ptr(data.p_message).to_string_lossy()
    };

    let sink = &*(p_user_data as *const Box<dyn DiagnosticsSink>);
    sink.report(message_severity.into(), &message, &objects_of(data));

    vk::FALSE
}
