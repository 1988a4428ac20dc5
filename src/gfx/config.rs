//! Runtime configuration, built once in `main` and handed out by reference.

use clap::Parser;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub model: PathBuf,
    pub texture: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::with_asset_root(Path::new("."))
    }
}

impl AppConfig {
    /// Resolves every asset path against `root`.
    pub fn with_asset_root(root: &Path) -> Self {
        Self {
            title: String::from("vkviewer"),
            width: 1280,
            height: 720,
            vertex_shader: root.join("shaders/vert.spv"),
            fragment_shader: root.join("shaders/frag.spv"),
            model: root.join("assets/models/model.obj"),
            texture: root.join("assets/textures/texture.png"),
        }
    }
}

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "vkviewer", version, about = "Renders a textured OBJ model with Vulkan")]
pub struct Args {
    /// Directory holding `shaders/` and `assets/`; defaults to the working directory
    pub asset_root: Option<PathBuf>,
}

impl From<Args> for AppConfig {
    fn from(args: Args) -> Self {
        match args.asset_root {
            Some(root) => Self::with_asset_root(&root),
            None => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_are_relative_to_working_directory() {
        let config = AppConfig::default();
        assert_eq!(config.vertex_shader, Path::new("./shaders/vert.spv"));
        assert_eq!(config.model, Path::new("./assets/models/model.obj"));
        assert_eq!((config.width, config.height), (1280, 720));
    }

    fn parse(args: &[&str]) -> Result<AppConfig, clap::Error> {
        Args::try_parse_from(args.iter().copied()).map(AppConfig::from)
    }

    #[test]
    fn positional_argument_overrides_asset_root() {
        let config = parse(&["vkviewer", "/opt/scene"]).unwrap();
        assert_eq!(config.texture, Path::new("/opt/scene/assets/textures/texture.png"));
        assert_eq!(config.fragment_shader, Path::new("/opt/scene/shaders/frag.spv"));
    }

    #[test]
    fn program_name_alone_keeps_defaults() {
        assert_eq!(parse(&["vkviewer"]).unwrap(), AppConfig::default());
    }

    #[test]
    fn help_is_not_taken_as_a_path() {
        let error = parse(&["vkviewer", "--help"]).unwrap_err();
        assert_eq!(error.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn extra_and_unknown_arguments_are_rejected() {
        assert!(parse(&["vkviewer", "/a", "/b"]).is_err());
        assert!(parse(&["vkviewer", "/a", "--bogus"]).is_err());
    }
}
