// =============================================================================
// FRAME PIPELINE DEMO - compute → graphics → present on timeline semaphores
// =============================================================================
//
// Every frame runs three dependent GPU stages on two queues:
//
// ┌─────────────────────────────────────────────────────────────────┐
// │  Compute queue:   Mandelbrot → storage image[slot]              │
// │        │ timeline: ComputeFinished                              │
// │  Graphics queue:  sample storage image → color attachment[slot] │
// │        │ timeline: GraphicsFinished                             │
// │  Graphics queue:  copy attachment → swapchain image, present    │
// │                   timeline: SafeToPresent (slot vacant again)   │
// └─────────────────────────────────────────────────────────────────┘
//
// Up to `max_frames_in_flight` frames overlap; the CPU only blocks when it
// comes back around to a slot whose previous frame is still running.
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use frame_pipeline::backend::surface::required_extensions;
use frame_pipeline::backend::{LogSink, Surface, Swapchain, VulkanDevice};
use frame_pipeline::config::Config;
use frame_pipeline::frame::{FrameLoop, FrameOutcome};
use frame_pipeline::tasks::{ComputeTask, GraphicsTask, SharedResources};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting frame pipeline");
    log::info!(
        "Window: {}x{}, {} frames in flight, {} acquire",
        config.window.width,
        config.window.height,
        config.frames_in_flight(),
        config.graphics.acquire_mode
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Initialize logging, optionally writing to the configured log file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env, Target};

    // RUST_LOG overrides the info default
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== Frame Pipeline Log ===");
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Failed to open log file {}: {}", config.debug.log_file, e),
        }
    }

    builder.init();
}

// =============================================================================
// RENDERER
// =============================================================================

/// Everything that lives as long as the window's Vulkan surface.
///
/// Field order is drop order: the frame loop drains the queues and releases
/// its slots first, the device goes last.
struct Renderer {
    frame_loop: FrameLoop<VulkanDevice>,
    graphics: GraphicsTask,
    compute: ComputeTask,
    _shared: Arc<SharedResources>,
    swapchain: Swapchain,
    surface: Surface,
    device: Arc<VulkanDevice>,
}

impl Renderer {
    fn new(window: &Window, config: &Config) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let display = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        let extensions = required_extensions(display)?;
        let device = VulkanDevice::new(
            &config.window.title,
            config.debug.validation_layers,
            &extensions,
            Box::new(LogSink),
        )?;

        // The window outlives the renderer, see App field order
        let surface = unsafe { Surface::new(device.clone(), display, handle)? };

        let size = window.inner_size();
        let swapchain = Swapchain::new(
            device.clone(),
            &surface,
            config.get_present_mode(),
            size.width,
            size.height,
            None,
        )?;

        let settings = config.frame_loop_settings();
        let storage_extent = vk::Extent2D {
            width: config.compute.image_width,
            height: config.compute.image_height,
        };
        let shared = Arc::new(SharedResources::new(
            device.clone(),
            settings.frames_in_flight,
            storage_extent,
        )?);
        let compute = ComputeTask::new(shared.clone(), config.compute.zoom_speed)?;
        let graphics = GraphicsTask::new(
            shared.clone(),
            swapchain.format,
            swapchain.extent,
            config.graphics.clear_color,
        )?;

        let frame_loop = FrameLoop::new(device.clone(), settings).context("Failed to create frame loop")?;

        log::info!(
            "Vulkan initialized successfully! ({} frames in flight)",
            frame_loop.frames_in_flight()
        );
        Ok(Self {
            frame_loop,
            graphics,
            compute,
            _shared: shared,
            swapchain,
            surface,
            device,
        })
    }

    /// Run one frame. Returns whether it was presented and whether the
    /// swapchain has to be recreated.
    fn render_frame(&mut self) -> Result<(bool, bool)> {
        let result = self
            .frame_loop
            .run_frame(&self.swapchain, &mut self.compute, &mut self.graphics);

        match result {
            Ok(FrameOutcome::Presented) => Ok((true, false)),
            Ok(FrameOutcome::Skipped) => Ok((false, false)),
            Err(e) if e.is_swapchain_stale() => {
                log::debug!("Frame {}: {}", self.frame_loop.frame_index(), e);
                Ok((false, true))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Recreate the swapchain and everything sized after it.
    fn recreate_swapchain(&mut self, config: &Config, width: u32, height: u32) -> Result<()> {
        // No frame may still reference the old images or semaphores
        let idle = self.frame_loop.wait_idle()?;

        self.swapchain = Swapchain::new(
            self.device.clone(),
            &self.surface,
            config.get_present_mode(),
            width,
            height,
            Some(&self.swapchain),
        )?;
        self.graphics.resize(self.swapchain.extent, &idle)?;
        self.frame_loop.recreate_present_sync(&idle)?;

        log::info!(
            "Swapchain recreated: {}x{}",
            self.swapchain.extent.width,
            self.swapchain.extent.height
        );
        Ok(())
    }

    fn shutdown(self) {
        let frames = self.frame_loop.frame_index();
        let Self { frame_loop, .. } = self;
        if let Err(e) = frame_loop.shutdown() {
            log::error!("Frame loop shutdown failed: {}", e);
        }
        log::info!("Rendered {} frames", frames);
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,

    // Declared before the window so the surface is destroyed first
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,

    /// Set when the window was resized or the swapchain went stale
    needs_resize: bool,
    /// Window has zero area, nothing can be presented
    is_minimized: bool,

    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            renderer: None,
            window: None,
            needs_resize: false,
            is_minimized: false,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn render_frame(&mut self) -> Result<bool> {
        if self.is_minimized {
            return Ok(false);
        }
        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref()) else {
            return Ok(false);
        };

        if self.needs_resize {
            let size = window.inner_size();
            renderer.recreate_swapchain(&self.config, size.width, size.height)?;
            self.needs_resize = false;
        }

        let (presented, stale) = renderer.render_frame()?;
        if stale {
            self.needs_resize = true;
        }
        Ok(presented)
    }

    fn shutdown(&mut self) {
        if let Some(renderer) = self.renderer.take() {
            renderer.shutdown();
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match Renderer::new(&window, &self.config) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:?}", e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: winit::window::WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    self.needs_resize = true;
                }
            }

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.update_fps(),
                Ok(false) => {}
                Err(e) => {
                    log::error!("Render error: {:?}", e);
                    self.shutdown();
                    event_loop.exit();
                }
            },

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    self.shutdown();
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
        log::info!("Cleanup complete");
    }
}
