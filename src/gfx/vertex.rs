//! CPU-side layouts shared with the shaders.

use cgmath::{Deg, Matrix4, Point3, Vector2, Vector3, point3, vec3};
use std::hash::{Hash, Hasher};
use std::mem::offset_of;
use vulkanalia::vk;

pub type Vec2 = Vector2<f32>;
pub type Vec3 = Vector3<f32>;
pub type Mat4 = Matrix4<f32>;

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct Vertex {
    pub pos: Vec3,
    pub color: Vec3,
    pub tex_coord: Vec2,
}

impl Vertex {
    pub const fn new(pos: Vec3, color: Vec3, tex_coord: Vec2) -> Self {
        Self {
            pos,
            color,
            tex_coord,
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        let attribute = |location, format, offset: usize| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset: offset as u32,
        };

        [
            attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, pos)),
            attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, color)),
            attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, tex_coord)),
        ]
    }

    fn bits(&self) -> [u32; 8] {
        [
            self.pos.x.to_bits(),
            self.pos.y.to_bits(),
            self.pos.z.to_bits(),
            self.color.x.to_bits(),
            self.color.y.to_bits(),
            self.color.z.to_bits(),
            self.tex_coord.x.to_bits(),
            self.tex_coord.y.to_bits(),
        ]
    }
}

// Bitwise, so that equal vertices always hash equally.
impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

fn eye() -> Point3<f32> {
    point3(1.0, 4.0, 2.0)
}

const DEGREES_PER_SECOND: f32 = 10.0;
const FIELD_OF_VIEW: Deg<f32> = Deg(25.0);
const NEAR_PLANE: f32 = 0.1;
const FAR_PLANE: f32 = 1000.0;

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    /// Transforms for `seconds` after startup, rendered into `extent`.
    pub fn at_time(seconds: f32, extent: vk::Extent2D) -> Self {
        let model = Mat4::from_axis_angle(vec3(0.0, 0.0, 1.0), Deg(DEGREES_PER_SECOND) * seconds);

        let view = Mat4::look_at_rh(eye(), point3(0.0, 0.0, 0.25), vec3(0.0, 0.0, 1.0));

        // cgmath targets OpenGL clip space: flip Y and map depth from -1..1 to 0..1.
        #[rustfmt::skip]
        let correction = Mat4::new(
            1.0,  0.0, 0.0, 0.0,
            0.0, -1.0, 0.0, 0.0,
            0.0,  0.0, 0.5, 0.0,
            0.0,  0.0, 0.5, 1.0,
        );

        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let proj = correction * cgmath::perspective(FIELD_OF_VIEW, aspect, NEAR_PLANE, FAR_PLANE);

        Self { model, view, proj }
    }
}
