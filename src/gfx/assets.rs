//! Model, texture and shader loading from disk.

use crate::gfx::vertex::{Vec2, Vec3, Vertex};
use anyhow::{Context, Result, bail};
use cgmath::{vec2, vec3};
use log::debug;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let mesh = Self::from_obj(&mut BufReader::new(file))?;
        debug!(
            "Loaded {} ({} vertices, {} indices).",
            path.display(),
            mesh.vertices.len(),
            mesh.indices.len()
        );
        Ok(mesh)
    }

    /// Parses a Wavefront OBJ stream, merging identical vertices. Materials are ignored.
    pub fn from_obj<R: BufRead>(reader: &mut R) -> Result<Self> {
        let (models, _) = tobj::load_obj_buf(
            reader,
            &tobj::LoadOptions {
                triangulate: true,
                single_index: true,
                ..Default::default()
            },
            |_| Ok(Default::default()),
        )?;

        let mut mesh = Self::default();
        let mut unique_vertices = HashMap::new();

        for model in &models {
            let positions = &model.mesh.positions;
            let texcoords = &model.mesh.texcoords;

            for index in &model.mesh.indices {
                let pos_offset = (3 * index) as usize;
                let tex_coord_offset = (2 * index) as usize;

                let tex_coord = match texcoords.get(tex_coord_offset..tex_coord_offset + 2) {
                    Some([u, v]) => vec2(*u, 1.0 - v),
                    _ => Vec2::new(0.0, 0.0),
                };

                let vertex = Vertex::new(
                    Vec3::new(
                        positions[pos_offset],
                        positions[pos_offset + 1],
                        positions[pos_offset + 2],
                    ),
                    vec3(1.0, 1.0, 1.0),
                    tex_coord,
                );

                let index = *unique_vertices.entry(vertex).or_insert_with(|| {
                    mesh.vertices.push(vertex);
                    (mesh.vertices.len() - 1) as u32
                });
                mesh.indices.push(index);
            }
        }

        Ok(mesh)
    }
}

/// Decoded texture, always tightly packed RGBA8.
#[derive(Clone, Debug)]
pub struct TexturePixels {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl TexturePixels {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let pixels = Self::from_png(BufReader::new(file))?;
        debug!("Loaded {} ({}x{}).", path.display(), pixels.width, pixels.height);
        Ok(pixels)
    }

    pub fn from_png<R: Read>(reader: R) -> Result<Self> {
        let mut decoder = png::Decoder::new(reader);
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);

        let mut reader = decoder.read_info()?;
        let mut buffer = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buffer)?;
        buffer.truncate(info.buffer_size());

        let rgba = expand_to_rgba(info.color_type, &buffer)?;

        Ok(Self {
            width: info.width,
            height: info.height,
            rgba,
        })
    }
}

fn expand_to_rgba(color_type: png::ColorType, bytes: &[u8]) -> Result<Vec<u8>> {
    let rgba = match color_type {
        png::ColorType::Rgba => bytes.to_vec(),
        png::ColorType::Rgb => bytes
            .chunks_exact(3)
            .flat_map(|p| [p[0], p[1], p[2], u8::MAX])
            .collect(),
        png::ColorType::GrayscaleAlpha => bytes
            .chunks_exact(2)
            .flat_map(|p| [p[0], p[0], p[0], p[1]])
            .collect(),
        png::ColorType::Grayscale => bytes.iter().flat_map(|g| [*g, *g, *g, u8::MAX]).collect(),
        other => bail!("Unsupported PNG color type {other:?}."),
    };

    Ok(rgba)
}

/// SPIR-V is passed through unparsed.
pub fn read_shader(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read shader {}", path.display()))
}
