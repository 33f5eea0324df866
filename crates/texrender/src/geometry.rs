//! Static fullscreen quad, drawn as a triangle fan.

/// Clip-space corners: top-left, bottom-left, bottom-right, top-right.
pub const QUAD_POSITIONS: [f32; 12] = [
    -1.0, 1.0, 0.0, //
    -1.0, -1.0, 0.0, //
    1.0, -1.0, 0.0, //
    1.0, 1.0, 0.0,
];

/// Texture coordinates per corner; v grows downwards so row 0 of a stream
/// buffer lands at the top of the surface.
pub const QUAD_TEXCOORDS: [f32; 8] = [
    0.0, 0.0, //
    0.0, 1.0, //
    1.0, 1.0, //
    1.0, 0.0,
];

pub const QUAD_VERTEX_COUNT: i32 = 4;
pub const POSITION_COMPONENTS: i32 = 3;
pub const TEXCOORD_COMPONENTS: i32 = 2;

pub fn position_bytes() -> &'static [u8] {
    bytemuck::cast_slice(&QUAD_POSITIONS)
}

pub fn texcoord_bytes() -> &'static [u8] {
    bytemuck::cast_slice(&QUAD_TEXCOORDS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_matches_fan_layout() {
        assert_eq!(
            QUAD_POSITIONS,
            [-1.0, 1.0, 0.0, -1.0, -1.0, 0.0, 1.0, -1.0, 0.0, 1.0, 1.0, 0.0]
        );
        assert_eq!(QUAD_TEXCOORDS, [0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0]);
        assert_eq!(
            QUAD_POSITIONS.len() as i32,
            QUAD_VERTEX_COUNT * POSITION_COMPONENTS
        );
        assert_eq!(
            QUAD_TEXCOORDS.len() as i32,
            QUAD_VERTEX_COUNT * TEXCOORD_COMPONENTS
        );
    }

    #[test]
    fn byte_views_are_native_endian_floats() {
        assert_eq!(position_bytes().len(), 12 * 4);
        assert_eq!(&position_bytes()[..4], &(-1.0f32).to_ne_bytes());
        assert_eq!(&texcoord_bytes()[4..8], &0.0f32.to_ne_bytes());
    }
}
