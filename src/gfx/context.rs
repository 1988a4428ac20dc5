//! Window and event handling around the renderer.

use crate::gfx::config::AppConfig;
use crate::gfx::frame::{FrameLoop, FrameOutcome};
use crate::gfx::renderer::Renderer;
use anyhow::Result;
use log::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow};
use winit::window::{Window, WindowId};

pub struct App {
    config: AppConfig,
    frames: FrameLoop,
    minimized: bool,
    // Dropped before the window it renders to.
    renderer: Option<Renderer>,
    window: Option<Window>,
    error: Option<anyhow::Error>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            frames: FrameLoop::default(),
            minimized: false,
            renderer: None,
            window: None,
            error: None,
        }
    }

    /// The error that stopped the event loop, if any.
    pub fn take_error(&mut self) -> Option<anyhow::Error> {
        self.error.take()
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.error = Some(e);
        self.renderer = None;
        event_loop.exit();
    }

    fn create_window(&self, event_loop: &ActiveEventLoop) -> Result<Window> {
        let attributes = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(LogicalSize::new(self.config.width, self.config.height));

        Ok(event_loop.create_window(attributes)?)
    }

    fn resized(&mut self, width: u32, height: u32) {
        self.minimized = width == 0 || height == 0;
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.set_window_size(width, height);
            self.frames.notify_resized();
        }
    }

    fn control_flow(&self) -> ControlFlow {
        if self.minimized {
            ControlFlow::Wait
        } else {
            ControlFlow::Poll
        }
    }

    fn render(&mut self) -> Result<()> {
        if self.minimized {
            return Ok(());
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };

        if self.frames.tick(renderer)? == FrameOutcome::Recreated {
            let extent = renderer.extent();
            debug!("Swapchain recreated at {}x{}.", extent.width, extent.height);
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match self.create_window(event_loop) {
            Ok(window) => window,
            Err(e) => return self.fail(event_loop, e),
        };

        match unsafe { Renderer::create(&window, &self.config) } {
            Ok(renderer) => {
                info!("Window and renderer created.");
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down.");
                self.renderer = None;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => self.resized(size.width, size.height),
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render() {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        // Block on events while minimized; the next non-zero resize wakes the loop.
        event_loop.set_control_flow(self.control_flow());
        if self.minimized {
            return;
        }
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_without_window_or_error() {
        let mut app = App::new(AppConfig::default());

        assert!(app.window.is_none());
        assert!(app.renderer.is_none());
        assert!(app.take_error().is_none());
    }

    #[test]
    fn minimized_window_stops_polling() {
        let mut app = App::new(AppConfig::default());
        assert_eq!(app.control_flow(), ControlFlow::Poll);

        app.resized(0, 720);
        assert!(app.minimized);
        assert_eq!(app.control_flow(), ControlFlow::Wait);

        app.resized(800, 600);
        assert!(!app.minimized);
        assert_eq!(app.control_flow(), ControlFlow::Poll);
    }
}
