// Demo scene content: a colored quad and its camera

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Bytes per vertex: vec3 position + vec4 color, interleaved.
pub const QUAD_STRIDE: u32 = (3 + 4) * std::mem::size_of::<f32>() as u32;

/// Four vertices for a triangle-strip quad, position then color.
pub fn quad_vertices() -> Vec<f32> {
    vec![
        -1.0, -1.0, 0.0, //
        1.0, 0.0, 0.0, 1.0, //
        -1.0, 1.0, 0.0, //
        0.0, 1.0, 0.0, 1.0, //
        1.0, -1.0, 0.0, //
        0.0, 0.0, 1.0, 1.0, //
        1.0, 1.0, 0.0, //
        1.0, 1.0, 1.0, 1.0, //
    ]
}

/// Strip order for the indexed path.
pub fn quad_indices() -> Vec<u32> {
    vec![0, 1, 2, 3]
}

/// Uniform block layout shared with the vertex shader (std140: three
/// column-major mat4s).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct SceneUniforms {
    pub projection: Mat4,
    pub model: Mat4,
    pub view: Mat4,
}

/// Camera parameters owned by the frame loop.
pub struct Camera {
    pub zoom: f32,
    pub rotation: Vec3,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            zoom: -2.5,
            rotation: Vec3::ZERO,
        }
    }
}

impl Camera {
    /// Matrices for the current camera state at the given drawable size.
    pub fn uniforms(&self, width: u32, height: u32) -> SceneUniforms {
        let aspect = width as f32 / height as f32;
        let projection = Mat4::perspective_rh(60f32.to_radians(), aspect, 0.1, 256.0);

        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, self.zoom));

        let model = Mat4::from_rotation_x(self.rotation.x.to_radians())
            * Mat4::from_rotation_y(self.rotation.y.to_radians())
            * Mat4::from_rotation_z(self.rotation.z.to_radians());

        SceneUniforms {
            projection,
            model,
            view,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_is_four_vertices_at_28_byte_stride() {
        let vertices = quad_vertices();
        let floats_per_vertex = QUAD_STRIDE as usize / std::mem::size_of::<f32>();
        assert_eq!(QUAD_STRIDE, 28);
        assert_eq!(vertices.len() % floats_per_vertex, 0);
        assert_eq!(vertices.len() / floats_per_vertex, 4);
    }

    #[test]
    fn uniform_block_is_three_packed_mat4s() {
        assert_eq!(std::mem::size_of::<SceneUniforms>(), 3 * 64);
    }

    #[test]
    fn identity_rotation_yields_identity_model() {
        let camera = Camera::default();
        let uniforms = camera.uniforms(640, 480);
        assert_eq!(uniforms.model, Mat4::IDENTITY);
        // View carries the zoom translation
        assert_eq!(uniforms.view.w_axis.z, -2.5);
    }

    #[test]
    fn strip_indices_cover_the_quad() {
        assert_eq!(quad_indices(), vec![0, 1, 2, 3]);
    }
}
