pub mod assets;
pub mod commands;
pub mod config;
pub mod consts;
pub mod context;
pub mod debug;
pub mod depth;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod layout;
pub mod memory;
pub mod pipeline;
pub mod queuefamily;
pub mod renderer;
pub mod renderpass;
pub mod swapchain;
pub mod texture;
pub mod transfer;
pub mod vertex;
