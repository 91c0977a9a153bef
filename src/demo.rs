// Procedural demo scenes
//
// Small scenes built in memory so the engine can run without any
// asset files. The torus generator exercises vertex deduplication
// and the node hierarchy; the flat scenes pin down culling, texture
// sampling and the transparent pass.

use squall::{
    FilterMode, MaterialData, MaterialPass, MeshData, MipmapMode, NodeData, NodeTransform,
    SamplerDesc, SceneData, SurfaceData, TextureData, Vertex,
};

use std::collections::HashMap;

pub fn scene_count() -> usize {
    3
}

pub fn build_scene(index: usize) -> SceneData {
    match index {
        0 => triangle_scene(),
        1 => textured_quad_scene(),
        _ => torus_ring_scene(),
    }
}

fn opaque_white() -> MaterialData {
    MaterialData {
        name: "white".to_string(),
        pass: MaterialPass::Opaque,
        color_factors: [1.0, 1.0, 1.0, 1.0],
        metallic_factor: 0.0,
        roughness_factor: 0.8,
        emissive_factor: [0.0, 0.0, 0.0],
        color_texture: None,
        color_sampler: None,
        metal_rough_texture: None,
        metal_rough_sampler: None,
    }
}

/// One triangle, white opaque material, identity transform. The
/// smallest thing that puts pixels through the whole pipeline.
fn triangle_scene() -> SceneData {
    let vertices = vec![
        Vertex {
            position: [-1.0, -1.0, 0.0],
            ..Default::default()
        },
        Vertex {
            position: [1.0, -1.0, 0.0],
            ..Default::default()
        },
        Vertex {
            position: [0.0, 1.0, 0.0],
            ..Default::default()
        },
    ];

    SceneData {
        meshes: vec![MeshData {
            name: "triangle".to_string(),
            vertices: vertices,
            indices: vec![0, 1, 2],
            surfaces: vec![SurfaceData {
                start_index: 0,
                count: 3,
                material: Some(0),
            }],
        }],
        materials: vec![opaque_white()],
        textures: Vec::new(),
        samplers: Vec::new(),
        nodes: vec![NodeData {
            name: "triangle".to_string(),
            transform: NodeTransform::Matrix(
                [
                    [1.0, 0.0, 0.0, 0.0],
                    [0.0, 1.0, 0.0, 0.0],
                    [0.0, 0.0, 1.0, 0.0],
                    [0.0, 0.0, 0.0, 1.0],
                ],
            ),
            mesh: Some(0),
            children: Vec::new(),
        }],
    }
}

fn quad_mesh(name: &str, material: Option<usize>) -> MeshData {
    let vertices = vec![
        Vertex {
            position: [-1.0, -1.0, 0.0],
            uv_x: 0.0,
            uv_y: 1.0,
            normal: [0.0, 0.0, 1.0],
            ..Default::default()
        },
        Vertex {
            position: [1.0, -1.0, 0.0],
            uv_x: 1.0,
            uv_y: 1.0,
            normal: [0.0, 0.0, 1.0],
            ..Default::default()
        },
        Vertex {
            position: [1.0, 1.0, 0.0],
            uv_x: 1.0,
            uv_y: 0.0,
            normal: [0.0, 0.0, 1.0],
            ..Default::default()
        },
        Vertex {
            position: [-1.0, 1.0, 0.0],
            uv_x: 0.0,
            uv_y: 0.0,
            normal: [0.0, 0.0, 1.0],
            ..Default::default()
        },
    ];

    MeshData {
        name: name.to_string(),
        vertices: vertices,
        indices: vec![0, 1, 2, 0, 2, 3],
        surfaces: vec![SurfaceData {
            start_index: 0,
            count: 6,
            material: material,
        }],
    }
}

/// A quad sampling a 2x2 test texture, plus a transparent emissive
/// panel floating in front of it.
fn textured_quad_scene() -> SceneData {
    // red, green / blue, white
    let pixels: Vec<u8> = vec![
        255, 0, 0, 255, //
        0, 255, 0, 255, //
        0, 0, 255, 255, //
        255, 255, 255, 255, //
    ];

    let mut textured = opaque_white();
    textured.name = "test grid".to_string();
    textured.color_texture = Some(0);
    textured.color_sampler = Some(0);

    let panel = MaterialData {
        name: "glow panel".to_string(),
        pass: MaterialPass::Transparent,
        color_factors: [0.2, 0.9, 0.9, 0.4],
        metallic_factor: 0.0,
        roughness_factor: 1.0,
        emissive_factor: [0.4, 1.8, 1.8],
        color_texture: None,
        color_sampler: None,
        metal_rough_texture: None,
        metal_rough_sampler: None,
    };

    SceneData {
        meshes: vec![
            quad_mesh("backdrop", Some(0)),
            quad_mesh("panel", Some(1)),
        ],
        materials: vec![textured, panel],
        textures: vec![TextureData {
            pixels: pixels,
            width: 2,
            height: 2,
            mipmapped: false,
        }],
        samplers: vec![SamplerDesc {
            mag: FilterMode::Nearest,
            min: FilterMode::Nearest,
            mipmap: MipmapMode::Nearest,
        }],
        nodes: vec![
            NodeData {
                name: "backdrop".to_string(),
                transform: NodeTransform::Trs {
                    translation: [0.0, 0.0, -1.0],
                    rotation: [0.0, 0.0, 0.0, 1.0],
                    scale: [2.0, 2.0, 1.0],
                },
                mesh: Some(0),
                children: Vec::new(),
            },
            NodeData {
                name: "panel".to_string(),
                transform: NodeTransform::Trs {
                    translation: [0.5, 0.0, 0.5],
                    rotation: [0.0, 0.0, 0.0, 1.0],
                    scale: [0.6, 0.6, 1.0],
                },
                mesh: Some(1),
                children: Vec::new(),
            },
        ],
    }
}

/// Parametric torus with deduplicated vertices.
///
/// The seam rows repeat the first ring, so building through a map
/// keyed on the vertex bits collapses them back into shared indices.
fn torus_mesh(major_radius: f32, minor_radius: f32, major_segments: u32, minor_segments: u32) -> MeshData {
    let mut vertices: Vec<Vertex> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();
    let mut dedup: HashMap<Vertex, u32> = HashMap::new();

    let tau = std::f32::consts::PI * 2.0;

    let vertex_at = |i: u32, j: u32| -> Vertex {
        let u = (i % major_segments) as f32 / major_segments as f32 * tau;
        let v = (j % minor_segments) as f32 / minor_segments as f32 * tau;

        let (cu, su) = (u.cos(), u.sin());
        let (cv, sv) = (v.cos(), v.sin());

        let center = [major_radius * cu, 0.0, major_radius * su];
        let normal = [cv * cu, sv, cv * su];

        Vertex {
            position: [
                center[0] + minor_radius * normal[0],
                center[1] + minor_radius * normal[1],
                center[2] + minor_radius * normal[2],
            ],
            normal: normal,
            uv_x: i as f32 / major_segments as f32,
            uv_y: j as f32 / minor_segments as f32,
            color: [1.0, 1.0, 1.0, 1.0],
        }
    };

    let mut push = |v: Vertex, vertices: &mut Vec<Vertex>| -> u32 {
        // uv differs at the seam even when position repeats; strip
        // it from the key so the rings actually weld
        let mut key = v;
        key.uv_x = 0.0;
        key.uv_y = 0.0;

        *dedup.entry(key).or_insert_with(|| {
            vertices.push(v);
            (vertices.len() - 1) as u32
        })
    };

    for i in 0..major_segments {
        for j in 0..minor_segments {
            let a = push(vertex_at(i, j), &mut vertices);
            let b = push(vertex_at(i + 1, j), &mut vertices);
            let c = push(vertex_at(i + 1, j + 1), &mut vertices);
            let d = push(vertex_at(i, j + 1), &mut vertices);

            indices.extend_from_slice(&[a, b, c, a, c, d]);
        }
    }

    MeshData {
        name: "torus".to_string(),
        vertices: vertices,
        indices: indices,
        surfaces: Vec::new(),
    }
}

/// A ring of tori under one spinning root, with an emissive
/// transparent core.
fn torus_ring_scene() -> SceneData {
    let mut torus = torus_mesh(0.6, 0.25, 32, 16);
    let count = torus.indices.len() as u32;
    torus.surfaces.push(SurfaceData {
        start_index: 0,
        count: count,
        material: Some(0),
    });

    let mut core = torus_mesh(0.3, 0.12, 24, 12);
    let core_count = core.indices.len() as u32;
    core.surfaces.push(SurfaceData {
        start_index: 0,
        count: core_count,
        material: Some(1),
    });

    let metal = MaterialData {
        name: "brushed".to_string(),
        pass: MaterialPass::Opaque,
        color_factors: [0.8, 0.82, 0.9, 1.0],
        metallic_factor: 0.9,
        roughness_factor: 0.35,
        emissive_factor: [0.0, 0.0, 0.0],
        color_texture: None,
        color_sampler: None,
        metal_rough_texture: None,
        metal_rough_sampler: None,
    };
    let ember = MaterialData {
        name: "ember".to_string(),
        pass: MaterialPass::Transparent,
        color_factors: [1.0, 0.45, 0.1, 0.6],
        metallic_factor: 0.0,
        roughness_factor: 1.0,
        emissive_factor: [2.0, 0.9, 0.2],
        color_texture: None,
        color_sampler: None,
        metal_rough_texture: None,
        metal_rough_sampler: None,
    };

    let ring_count = 5usize;
    let mut nodes = vec![NodeData {
        name: "ring root".to_string(),
        transform: NodeTransform::Trs {
            translation: [0.0, 0.0, 0.0],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0, 1.0, 1.0],
        },
        mesh: None,
        children: (1..=ring_count).collect(),
    }];

    for i in 0..ring_count {
        let angle = i as f32 / ring_count as f32 * std::f32::consts::PI * 2.0;
        let (s, c) = angle.sin_cos();
        let half = angle * 0.5;

        nodes.push(NodeData {
            name: format!("torus {}", i),
            transform: NodeTransform::Trs {
                translation: [c * 3.0, 0.0, s * 3.0],
                rotation: [0.0, half.sin(), 0.0, half.cos()],
                scale: [1.0, 1.0, 1.0],
            },
            mesh: Some(0),
            children: Vec::new(),
        });
    }

    nodes.push(NodeData {
        name: "core".to_string(),
        transform: NodeTransform::Trs {
            translation: [0.0, 0.0, 0.0],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.5, 1.5, 1.5],
        },
        mesh: Some(1),
        children: Vec::new(),
    });

    SceneData {
        meshes: vec![torus, core],
        materials: vec![metal, ember],
        textures: Vec::new(),
        samplers: Vec::new(),
        nodes: nodes,
    }
}
