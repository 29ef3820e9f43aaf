//! MMD 材质定义

use glam::{Vec3, Vec4};

/// 球面贴图模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SphereMode {
    #[default]
    None,
    Mul,
    Add,
}

/// MMD 材质（渲染层只读）
#[derive(Clone, Debug)]
pub struct MmdMaterial {
    pub name: String,
    pub diffuse: Vec4,
    pub specular: Vec3,
    pub specular_power: f32,
    pub ambient: Vec3,
    pub edge_color: Vec4,
    pub edge_size: f32,
    pub texture: Option<usize>,
    pub sphere_texture: Option<usize>,
    pub sphere_mode: SphereMode,
    pub toon_texture: Option<usize>,
    pub draw_flags: u8,
}

impl MmdMaterial {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// 是否双面渲染
    pub fn is_double_sided(&self) -> bool {
        (self.draw_flags & 0x01) != 0
    }

    /// 是否投射地面阴影
    pub fn casts_ground_shadow(&self) -> bool {
        (self.draw_flags & 0x02) != 0
    }

    /// 是否投射阴影
    pub fn casts_shadow(&self) -> bool {
        (self.draw_flags & 0x04) != 0
    }

    /// 是否接收阴影
    pub fn receives_shadow(&self) -> bool {
        (self.draw_flags & 0x08) != 0
    }

    /// 是否绘制边缘
    pub fn has_edge(&self) -> bool {
        (self.draw_flags & 0x10) != 0
    }
}

impl Default for MmdMaterial {
    fn default() -> Self {
        Self {
            name: String::new(),
            diffuse: Vec4::ONE,
            specular: Vec3::ZERO,
            specular_power: 0.0,
            ambient: Vec3::splat(0.5),
            edge_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            edge_size: 1.0,
            texture: None,
            sphere_texture: None,
            sphere_mode: SphereMode::None,
            toon_texture: None,
            draw_flags: 0,
        }
    }
}
