use crate::error::*;
use crate::io::*;
use crate::types::*;
use bytes::{Buf, BufMut};
use fds_derive::{Readable, Writable};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MaterialFlags: u32 {
        const MISC_UNLIT = 1 << 0;

        const ENV_OVERLAY = 1 << 8;
        const ENV_MULTIPLY = 1 << 9;
        const ENV_ADDITIVE = 1 << 10;
        const ENV_DISABLE_TEX = 1 << 11;
        const ENV_PROJECT_Y = 1 << 12;
        const ENV_DETERMINED_Y = 1 << 13;
        const ENV_DETERMINED_Z = 1 << 14;
        const ENV_ADD_EFFECT = 1 << 15;

        const DISABLE_U_TILING = 1 << 16;
        const DISABLE_V_TILING = 1 << 17;
        const DIFFUSE_TEX = 1 << 18;
        const ENV_MAP = 1 << 19;
        const CALC_REFLECT_TEX_Y = 1 << 20;
        const PROJECT_REFLECT_TEX_Y = 1 << 21;
        const PROJECT_REFLECT_TEX_Z = 1 << 22;
        const MIPMAP = 1 << 23;
        const ALPHA_IN_TEX = 1 << 24;
        const ANIMATED_ALPHA = 1 << 25;
        const ANIMATED_DIFFUSE = 1 << 26;
        const COLORED = 1 << 27;
        const DOUBLE_SIDED = 1 << 28;
        const COLOR_KEY = 1 << 29;
        const ALPHA = 1 << 30;
        const ADDITIVE = 1 << 31;

        const _ = !0;
    }
}

flags_codec!(MaterialFlags, u32);

#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct EnvironmentMap {
    pub intensity: f32,
    pub texture: String,
}

/// Frame-sequence parameters of an animated diffuse texture. The reserved
/// words are kept as found.
#[derive(Debug, Clone, Copy, PartialEq, Default, Readable, Writable)]
pub struct TextureAnimation {
    pub frame_count: u32,
    pub reserved0: u16,
    pub period: u32,
    pub reserved1: u32,
    pub reserved2: u32,
}

/// One entry of the material table. Faces refer to it by 1-based position.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub flags: MaterialFlags,
    pub ambient: ColorF,
    pub diffuse: ColorF,
    pub emission: ColorF,
    pub opacity: f32,
    /// Present iff `ENV_MAP` is set.
    pub environment: Option<EnvironmentMap>,
    pub diffuse_texture: String,
    /// Present iff `ALPHA` is set.
    pub alpha_texture: Option<String>,
    /// Present iff `ANIMATED_DIFFUSE` is set.
    pub animation: Option<TextureAnimation>,
}

impl Material {
    pub fn new() -> Material {
        Material {
            flags: MaterialFlags::DIFFUSE_TEX | MaterialFlags::MIPMAP,
            ambient: ColorF {
                r: 1.0,
                g: 1.0,
                b: 1.0,
            },
            diffuse: ColorF {
                r: 1.0,
                g: 1.0,
                b: 1.0,
            },
            emission: ColorF::default(),
            opacity: 1.0,
            environment: None,
            diffuse_texture: String::new(),
            alpha_texture: None,
            animation: None,
        }
    }

    pub fn tile_u(&self) -> bool {
        !self.flags.contains(MaterialFlags::DISABLE_U_TILING)
    }

    pub fn tile_v(&self) -> bool {
        !self.flags.contains(MaterialFlags::DISABLE_V_TILING)
    }

    pub fn set_environment(&mut self, environment: Option<EnvironmentMap>) {
        self.flags.set(MaterialFlags::ENV_MAP, environment.is_some());
        self.environment = environment;
    }

    pub fn set_alpha_texture(&mut self, texture: Option<String>) {
        self.flags.set(MaterialFlags::ALPHA, texture.is_some());
        self.alpha_texture = texture;
    }

    pub fn set_animation(&mut self, animation: Option<TextureAnimation>) {
        self.flags
            .set(MaterialFlags::ANIMATED_DIFFUSE, animation.is_some());
        self.animation = animation;
    }

    /// Upper-cases every texture name, the way the engine looks them up.
    pub fn uppercase_textures(&mut self) {
        self.diffuse_texture = self.diffuse_texture.to_uppercase();
        if let Some(env) = &mut self.environment {
            env.texture = env.texture.to_uppercase();
        }
        if let Some(alpha) = &mut self.alpha_texture {
            *alpha = alpha.to_uppercase();
        }
    }

    fn check_gates(&self) -> EncodeResult<()> {
        let gates = [
            (
                MaterialFlags::ENV_MAP,
                self.environment.is_some(),
                "ENV_MAP set without an environment block",
                "environment block present without ENV_MAP",
            ),
            (
                MaterialFlags::ALPHA,
                self.alpha_texture.is_some(),
                "ALPHA set without an alpha texture",
                "alpha texture present without ALPHA",
            ),
            (
                MaterialFlags::ANIMATED_DIFFUSE,
                self.animation.is_some(),
                "ANIMATED_DIFFUSE set without an animation block",
                "animation block present without ANIMATED_DIFFUSE",
            ),
        ];
        for &(flag, present, missing, stray) in gates.iter() {
            let reason = match (self.flags.contains(flag), present) {
                (true, false) => missing,
                (false, true) => stray,
                _ => continue,
            };
            return Err(EncodeError::InconsistentMaterial {
                texture: self.diffuse_texture.clone(),
                reason,
            });
        }
        Ok(())
    }
}

impl Default for Material {
    fn default() -> Self {
        Material::new()
    }
}

impl Readable<Material> for Material {
    fn read(from: &mut dyn Buf, ctx: &mut Context) -> DecodeResult<Self> {
        let flags = MaterialFlags::read(from, ctx)?;
        let ambient = ColorF::read(from, ctx)?;
        let diffuse = ColorF::read(from, ctx)?;
        let emission = ColorF::read(from, ctx)?;
        let opacity = f32::read(from, ctx)?;

        let environment = if flags.contains(MaterialFlags::ENV_MAP) {
            Some(EnvironmentMap::read(from, ctx)?)
        } else {
            None
        };
        let diffuse_texture = String::read(from, ctx)?;
        let alpha_texture = if flags.contains(MaterialFlags::ALPHA) {
            Some(String::read(from, ctx)?)
        } else {
            None
        };
        let animation = if flags.contains(MaterialFlags::ANIMATED_DIFFUSE) {
            Some(TextureAnimation::read(from, ctx)?)
        } else {
            None
        };

        Ok(Material {
            flags,
            ambient,
            diffuse,
            emission,
            opacity,
            environment,
            diffuse_texture,
            alpha_texture,
            animation,
        })
    }
}

impl Writable<Material> for Material {
    fn write(&self, to: &mut dyn BufMut, ctx: &Context) -> EncodeResult<()> {
        self.check_gates()?;

        self.flags.write(to, ctx)?;
        self.ambient.write(to, ctx)?;
        self.diffuse.write(to, ctx)?;
        self.emission.write(to, ctx)?;
        self.opacity.write(to, ctx)?;
        if let Some(environment) = &self.environment {
            environment.write(to, ctx)?;
        }
        self.diffuse_texture.write(to, ctx)?;
        if let Some(alpha) = &self.alpha_texture {
            alpha.write(to, ctx)?;
        }
        if let Some(animation) = &self.animation {
            animation.write(to, ctx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(material: &Material) -> Material {
        let ctx = Context::new();
        let mut out = vec![];
        material.write(&mut out, &ctx).unwrap();
        let mut ctx = Context::new();
        let mut data: &[u8] = &out;
        let back = Material::read(&mut data, &mut ctx).unwrap();
        assert_eq!(data.remaining(), 0);
        back
    }

    #[test]
    fn plain_material_layout() {
        let mut m = Material::new();
        m.diffuse_texture = "BRICK.BMP".into();
        let ctx = Context::new();
        let mut out = vec![];
        m.write(&mut out, &ctx).unwrap();
        // flags, 3 colors, opacity, diffuse name
        assert_eq!(out.len(), 4 + 36 + 4 + 1 + 9);
        assert_eq!(round_trip(&m), m);
    }

    #[test]
    fn every_gated_block_round_trips() {
        let mut m = Material::new();
        m.diffuse_texture = "WATER.BMP".into();
        m.set_environment(Some(EnvironmentMap {
            intensity: 0.5,
            texture: "ENV.BMP".into(),
        }));
        m.set_alpha_texture(Some("WATER+.BMP".into()));
        m.set_animation(Some(TextureAnimation {
            frame_count: 8,
            reserved0: 1,
            period: 100,
            reserved1: 2,
            reserved2: 3,
        }));
        assert!(m.flags.contains(
            MaterialFlags::ENV_MAP | MaterialFlags::ALPHA | MaterialFlags::ANIMATED_DIFFUSE
        ));
        assert_eq!(round_trip(&m), m);
    }

    #[test]
    fn all_single_bits_round_trip() {
        for bit in 0..32 {
            let mut m = Material::new();
            m.flags = MaterialFlags::from_bits_retain(1u32 << bit);
            if m.flags.contains(MaterialFlags::ENV_MAP) {
                m.environment = Some(EnvironmentMap {
                    intensity: 1.0,
                    texture: "E".into(),
                });
            }
            if m.flags.contains(MaterialFlags::ALPHA) {
                m.alpha_texture = Some("A".into());
            }
            if m.flags.contains(MaterialFlags::ANIMATED_DIFFUSE) {
                m.animation = Some(TextureAnimation::default());
            }
            assert_eq!(round_trip(&m), m, "bit {}", bit);
        }
    }

    #[test]
    fn unknown_bits_survive() {
        let mut m = Material::new();
        m.flags = MaterialFlags::from_bits_retain(0b1111_1110);
        assert_eq!(round_trip(&m).flags.bits(), 0b1111_1110);
    }

    #[test]
    fn tiling_is_inverted() {
        let mut m = Material::new();
        assert!(m.tile_u() && m.tile_v());
        m.flags |= MaterialFlags::DISABLE_V_TILING;
        assert!(m.tile_u());
        assert!(!m.tile_v());
    }

    #[test]
    fn gate_mismatch_is_an_error() {
        let mut m = Material::new();
        m.flags |= MaterialFlags::ALPHA;
        let ctx = Context::new();
        let mut out = vec![];
        assert!(matches!(
            m.write(&mut out, &ctx),
            Err(EncodeError::InconsistentMaterial { .. })
        ));

        let mut m = Material::new();
        m.environment = Some(EnvironmentMap {
            intensity: 1.0,
            texture: "X".into(),
        });
        assert!(matches!(
            m.write(&mut out, &ctx),
            Err(EncodeError::InconsistentMaterial { .. })
        ));
    }

    #[test]
    fn additive_does_not_imply_anything_else() {
        let mut m = Material::new();
        m.flags = MaterialFlags::ADDITIVE;
        let back = round_trip(&m);
        assert_eq!(back.flags, MaterialFlags::ADDITIVE);
    }
}
