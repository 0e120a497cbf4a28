//! Scenes built in code for the integration tests.
#![allow(dead_code)]

use cgmath::SquareMatrix;
use fourds::frame::*;
use fourds::geometry::*;
use fourds::material::*;
use fourds::morph::*;
use fourds::sector::{Portal, Sector};
use fourds::skin::*;
use fourds::types::*;
use fourds::visual::*;
use fourds::SceneGraph;

pub fn corner(vertex: u32, u: f32, v: f32) -> Corner {
    Corner {
        vertex,
        normal: Point3F::new(0.0, 0.0, 1.0),
        uv: Point2F::new(u, v),
    }
}

pub fn quad_positions() -> Vec<Point3F> {
    vec![
        Point3F::new(0.0, 0.0, 0.0),
        Point3F::new(1.0, 0.0, 0.0),
        Point3F::new(1.0, 1.0, 0.0),
        Point3F::new(0.0, 1.0, 0.5),
    ]
}

pub fn quad_triangles(material: Option<MaterialId>) -> Vec<SourceTriangle> {
    vec![
        SourceTriangle {
            corners: [corner(0, 0.0, 0.0), corner(1, 1.0, 0.0), corner(2, 1.0, 1.0)],
            material,
        },
        SourceTriangle {
            corners: [corner(0, 0.0, 0.0), corner(2, 1.0, 1.0), corner(3, 0.0, 1.0)],
            material,
        },
    ]
}

pub fn quad_lod(material: Option<MaterialId>) -> DedupedLod {
    let positions = quad_positions();
    LodBuilder::new(&positions)
        .build(50.0, &quad_triangles(material))
        .unwrap()
}

pub fn visual(body: VisualBody) -> FrameKind {
    FrameKind::Visual(Visual {
        render_flags: RenderFlags::default(),
        render_flags2: RenderFlags2::default(),
        body,
    })
}

pub fn joint(bone_id: u32) -> FrameKind {
    FrameKind::Joint(Joint {
        matrix: JointMatrix::from_matrix(&MatrixF::identity()),
        bone_id: BoneId::new(bone_id),
    })
}

pub fn child(name: &str, parent: Parent, kind: FrameKind) -> Frame {
    let mut frame = Frame::new(name, kind);
    frame.parent = parent;
    frame
}

pub fn node(index: usize) -> NodeIndex {
    NodeIndex::new(index)
}

pub fn translated(mut frame: Frame, x: f32, y: f32, z: f32) -> Frame {
    frame.transform.position = Point3F::new(x, y, z);
    frame
}

pub fn materials() -> Vec<Material> {
    let mut plain = Material::new();
    plain.diffuse_texture = "SKIN.BMP".into();

    let mut fancy = Material::new();
    fancy.diffuse_texture = "GLASS.BMP".into();
    fancy.flags |= MaterialFlags::DOUBLE_SIDED | MaterialFlags::ADDITIVE;
    fancy.opacity = 0.25;
    fancy.set_environment(Some(EnvironmentMap {
        intensity: 0.75,
        texture: "SKY.BMP".into(),
    }));
    fancy.set_alpha_texture(Some("GLASS+.BMP".into()));
    fancy.set_animation(Some(TextureAnimation {
        frame_count: 4,
        reserved0: 0,
        period: 120,
        reserved1: 0,
        reserved2: 0,
    }));
    vec![plain, fancy]
}

/// Skinned body with two joints; bone 1 gets no vertices when `empty_bone`.
pub fn skinned_body(empty_bone: bool) -> VisualBody {
    let mut built = quad_lod(Some(MaterialId::new(1)));
    let bones = vec![
        BoneWeights {
            bone_id: BoneId::new(0),
            inverse_bind: MatrixF::identity(),
            weights: if empty_bone {
                vec![(0, 1.0), (1, 1.0), (2, 0.5)]
            } else {
                vec![(0, 1.0), (1, 1.0)]
            },
        },
        BoneWeights {
            bone_id: BoneId::new(1),
            inverse_bind: MatrixF::from_translation(Point3F::new(0.0, -1.0, 0.0)),
            weights: if empty_bone { vec![] } else { vec![(2, 0.6), (3, 1.0)] },
        },
    ];
    let skin = SkinBinding::build(
        &mut built.lod,
        &mut built.vertex_map,
        &bones,
        &SkinThresholds::default(),
    )
    .unwrap();
    VisualBody::SingleMesh {
        mesh: Mesh {
            instance: None,
            lods: vec![built.lod],
        },
        skins: vec![skin],
    }
}

pub fn face_morph(lod: &Lod) -> Morph {
    Morph {
        target_count: 1,
        channel_count: 1,
        lods: vec![MorphLod {
            channels: vec![MorphChannel {
                vertices: lod
                    .vertices
                    .iter()
                    .map(|v| {
                        vec![MorphPoint {
                            position: v.position + Point3F::new(0.0, 0.0, 0.1),
                            normal: v.normal,
                        }]
                    })
                    .collect(),
                indices: None,
            }],
            bounds: lod.bounds(),
            center: lod.bounds().center(),
            radius: 1.5,
        }],
    }
}

/// A scene touching every supported frame kind, already in hierarchy order.
pub fn sample_scene() -> SceneGraph {
    let mut scene = SceneGraph::new();
    scene.timestamp = 132_000_000_000_000_000;
    scene.materials = materials();

    let face_lod = quad_lod(Some(MaterialId::new(2))).lod;
    let morph = face_morph(&face_lod);

    let mut body = Frame::new("body", visual(skinned_body(false)));
    body.cull_flags = CullFlags::VISIBLE | CullFlags::COLLIDE_PLAYER;
    body.user_props = "weight=80".into();
    scene.add_frame(body);
    scene.add_frame(translated(child("bone_root", Parent::Frame(node(0)), joint(0)), 0.0, 0.0, 1.0));
    scene.add_frame(translated(child("bone_arm", Parent::Bone(node(1)), joint(1)), 0.5, 0.0, 0.0));
    scene.add_frame(child(
        "hand",
        Parent::Bone(node(2)),
        FrameKind::Dummy(Dummy {
            bounds: BoxF {
                min: Point3F::new(-0.1, -0.1, -0.1),
                max: Point3F::new(0.1, 0.1, 0.1),
            },
        }),
    ));

    let room_mesh = SimpleMesh {
        vertices: quad_positions(),
        faces: vec![Triangle([0, 1, 2]), Triangle([0, 2, 3])],
    };
    let mut room = Sector::new(room_mesh.clone());
    room.portals.push(Portal::new(vec![
        Point3F::new(1.0, 0.0, 0.0),
        Point3F::new(1.0, 1.0, 0.0),
        Point3F::new(1.0, 1.0, 1.0),
    ]));
    scene.add_frame(Frame::new("room", FrameKind::Sector(room)));

    scene.add_frame(child(
        "lamp",
        Parent::Frame(node(4)),
        visual(VisualBody::Billboard {
            mesh: Mesh {
                instance: None,
                lods: vec![quad_lod(None).lod],
            },
            billboard: Billboard { axis: 2, mode: 1 },
        }),
    ));
    scene.add_frame(child(
        "lamp_copy",
        Parent::Frame(node(4)),
        visual(VisualBody::Object(Mesh {
            instance: Some(node(5)),
            lods: vec![],
        })),
    ));
    scene.add_frame(child(
        "face",
        Parent::Frame(node(4)),
        visual(VisualBody::Morph {
            mesh: Mesh {
                instance: None,
                lods: vec![face_lod],
            },
            morph: Some(morph),
        }),
    ));
    scene.add_frame(child(
        "mirror",
        Parent::Frame(node(4)),
        visual(VisualBody::Mirror(Mirror {
            bounds: BoxF {
                min: Point3F::new(0.0, 0.0, 0.0),
                max: Point3F::new(2.0, 0.1, 3.0),
            },
            center: Point3F::new(1.0, 0.05, 1.5),
            radius: 2.0,
            matrix: MatrixF::identity(),
            color: ColorF {
                r: 0.1,
                g: 0.2,
                b: 0.3,
            },
            distance: 40.0,
            mesh: room_mesh.clone(),
        })),
    ));
    scene.add_frame(child(
        "lens",
        Parent::Frame(node(4)),
        visual(VisualBody::Other {
            kind: VisualType::Lens,
            mesh: Mesh {
                instance: None,
                lods: vec![quad_lod(None).lod],
            },
        }),
    ));
    scene.add_frame(Frame::new(
        "occluder",
        FrameKind::Occluder(Occluder { mesh: room_mesh }),
    ));
    scene.add_frame(Frame::new(
        "target",
        FrameKind::Target(Target {
            flags: 3,
            links: vec![node(5), node(7)],
        }),
    ));
    scene
}

/// Writes a file header with no materials, ready for hand-written frames.
pub fn header(frame_count: u16) -> Vec<u8> {
    let mut bytes = b"4DS\0".to_vec();
    bytes.extend_from_slice(&29u16.to_le_bytes());
    bytes.extend_from_slice(&0u64.to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    bytes.extend_from_slice(&frame_count.to_le_bytes());
    bytes
}
