// Window surface - platform connection for presentation
//
// Supports Win32, Xlib, Xcb and Wayland windows through raw-window-handle.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::c_char;
use std::sync::Arc;

use super::VulkanDevice;

/// Instance extensions needed to create a surface for `display`.
pub fn required_extensions(display: RawDisplayHandle) -> Result<Vec<*const c_char>> {
    let platform = match display {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        other => anyhow::bail!("Unsupported display handle: {:?}", other),
    };
    Ok(vec![khr::Surface::name().as_ptr(), platform.as_ptr()])
}

/// Presentation surface of one window.
pub struct Surface {
    pub surface: vk::SurfaceKHR,
    pub loader: khr::Surface,
    // Keeps the instance alive
    _device: Arc<VulkanDevice>,
}

impl Surface {
    /// Create a surface for the window.
    ///
    /// # Safety
    /// The handles must stay valid for the lifetime of the surface.
    pub unsafe fn new(device: Arc<VulkanDevice>, display: RawDisplayHandle, window: RawWindowHandle) -> Result<Self> {
        let entry = &device.entry;
        let instance = &device.instance;

        let surface = match (display, window) {
            (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
                let hinstance = handle.hinstance.map_or(0, |h| h.get()) as *const std::ffi::c_void;
                let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                    .hinstance(hinstance)
                    .hwnd(handle.hwnd.get() as *const std::ffi::c_void);
                khr::Win32Surface::new(entry, instance).create_win32_surface(&create_info, None)?
            }
            (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
                let dpy = display.display.map_or(std::ptr::null_mut(), |d| d.as_ptr());
                let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                    .dpy(dpy as *mut vk::Display)
                    .window(handle.window);
                khr::XlibSurface::new(entry, instance).create_xlib_surface(&create_info, None)?
            }
            (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle)) => {
                let connection = display.connection.map_or(std::ptr::null_mut(), |c| c.as_ptr());
                let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                    .connection(connection)
                    .window(handle.window.get());
                khr::XcbSurface::new(entry, instance).create_xcb_surface(&create_info, None)?
            }
            (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
                let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                    .display(display.display.as_ptr())
                    .surface(handle.surface.as_ptr());
                khr::WaylandSurface::new(entry, instance).create_wayland_surface(&create_info, None)?
            }
            _ => anyhow::bail!("Unsupported window handle type"),
        };

        let loader = khr::Surface::new(entry, instance);

        let supported = loader
            .get_physical_device_surface_support(device.physical_device, device.queue_family, surface)
            .context("Failed to query surface support")?;
        if !supported {
            loader.destroy_surface(surface, None);
            anyhow::bail!("GPU doesn't support presenting to this surface");
        }

        Ok(Self {
            surface,
            loader,
            _device: device,
        })
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_surface(self.surface, None) };
    }
}
