//! Authoring-side description of a scene, as an exporter hands it over.
//!
//! Everything is in model axes with plain arrays so the description can be
//! stored as JSON. Matrices are column-major (`m[column][row]`). Objects
//! refer to each other by name.

use serde::{Deserialize, Serialize};

pub type Vec2 = [f32; 2];
pub type Vec3 = [f32; 3];
pub type Mat4 = [[f32; 4]; 4];

pub const IDENTITY: Mat4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceScene {
    pub materials: Vec<SourceMaterial>,
    pub objects: Vec<SourceObject>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceMaterial {
    pub name: String,
    pub diffuse_texture: String,
    pub alpha_texture: Option<String>,
    pub environment_texture: Option<String>,
    pub environment_intensity: f32,
    pub ambient: Vec3,
    pub diffuse: Vec3,
    pub emission: Vec3,
    pub opacity: f32,
    /// Raw material bits. Texture presence bits are derived from the
    /// fields above and override whatever is set here.
    pub flags: Option<u32>,
    pub animation: Option<SourceTextureAnimation>,
}

impl Default for SourceMaterial {
    fn default() -> Self {
        SourceMaterial {
            name: String::new(),
            diffuse_texture: String::new(),
            alpha_texture: None,
            environment_texture: None,
            environment_intensity: 1.0,
            ambient: [1.0, 1.0, 1.0],
            diffuse: [1.0, 1.0, 1.0],
            emission: [0.0, 0.0, 0.0],
            opacity: 1.0,
            flags: None,
            animation: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceTextureAnimation {
    pub frame_count: u32,
    pub period: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceObject {
    pub name: String,
    pub parent: Option<String>,
    /// Bone of the parent armature this object hangs from.
    pub parent_bone: Option<String>,
    pub world: Mat4,
    pub cull_flags: Option<u8>,
    pub render_flags: Option<[u8; 2]>,
    pub user_props: String,
    pub data: ObjectData,
}

impl Default for SourceObject {
    fn default() -> Self {
        SourceObject {
            name: String::new(),
            parent: None,
            parent_bone: None,
            world: IDENTITY,
            cull_flags: None,
            render_flags: None,
            user_props: String::new(),
            data: ObjectData::Dummy {
                min: [0.0; 3],
                max: [0.0; 3],
            },
        }
    }
}

impl SourceObject {
    pub fn new(name: &str, data: ObjectData) -> SourceObject {
        SourceObject {
            name: name.to_owned(),
            data,
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_owned());
        self
    }

    pub fn with_parent_bone(mut self, armature: &str, bone: &str) -> Self {
        self.parent = Some(armature.to_owned());
        self.parent_bone = Some(bone.to_owned());
        self
    }

    pub fn with_world(mut self, world: Mat4) -> Self {
        self.world = world;
        self
    }

    pub fn mesh(&self) -> Option<&SourceMesh> {
        match &self.data {
            ObjectData::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectData {
    Mesh(SourceMesh),
    /// Axis-aligned helper box.
    Dummy { min: Vec3, max: Vec3 },
    /// Helper pointing at other objects by name.
    Target {
        #[serde(default)]
        links: Vec<String>,
    },
    /// Never written itself; its bones become joint frames.
    Armature { bones: Vec<SourceBone> },
    Sector(SourceSector),
    Occluder(SourcePolyMesh),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceMesh {
    pub positions: Vec<Vec3>,
    pub faces: Vec<SourceFace>,
    /// Material names by slot; faces refer to slots.
    pub material_slots: Vec<Option<String>>,
    pub fade_distance: f32,
    /// Reuse the geometry of another mesh object instead of carrying any.
    pub instance_of: Option<String>,
    pub skin: Option<SourceSkin>,
    /// Shape keys named `Target_<t>_LOD<l>_Channel<c>` become morph
    /// targets; others are ignored.
    pub shape_keys: Vec<SourceShapeKey>,
    pub billboard: Option<SourceBillboard>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceCorner {
    pub vertex: u32,
    pub normal: Vec3,
    #[serde(default)]
    pub uv: Vec2,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceFace {
    pub corners: [SourceCorner; 3],
    #[serde(default)]
    pub material_slot: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSkin {
    pub armature: String,
    /// Vertex groups, named after the bones they follow.
    #[serde(default)]
    pub groups: Vec<SourceVertexGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceVertexGroup {
    pub bone: String,
    pub weights: Vec<(u32, f32)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceShapeKey {
    pub name: String,
    pub positions: Vec<Vec3>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceBillboard {
    pub axis: u32,
    pub mode: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceBone {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    /// Rest matrix in armature space.
    pub matrix_local: Mat4,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcePolyMesh {
    pub positions: Vec<Vec3>,
    pub triangles: Vec<[u32; 3]>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSector {
    pub mesh: SourcePolyMesh,
    pub flags: Option<[u32; 2]>,
    pub portals: Vec<SourcePortal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcePortal {
    pub vertices: Vec<Vec3>,
    pub flags: Option<u32>,
    pub near: Option<f32>,
    pub far: Option<f32>,
}
