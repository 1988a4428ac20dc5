use anyhow::Result;
use clap::Parser;
use gfx::config::{AppConfig, Args};
use gfx::context::App;
use winit::event_loop::{ControlFlow, EventLoop};

mod gfx;

fn main() -> Result<()> {
    pretty_env_logger::init();

    let config = AppConfig::from(Args::parse());
    log::info!("Loading assets from {}", config.model.display());

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.take_error() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
