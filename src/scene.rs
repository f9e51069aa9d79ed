use nalgebra::Matrix3;

use crate::geometry::{Fp, Object, Vec3f, EPS};

/// Hard cap on recursion depth regardless of what the scene asks for.
pub static MAX_RAY_DEPTH: i32 = 10;

#[derive(Clone, Debug)]
pub struct Camera {
    pub position: Vec3f,
    pub target: Vec3f,
    pub up: Vec3f,
    /// Vertical field of view, degrees.
    pub fov: Fp,
    pub img_width: usize,
    pub img_height: usize,
}

#[derive(Clone, Debug)]
pub enum Light {
    Ambient {
        intensity: Vec3f,
    },
    Directional {
        intensity: Vec3f,
        /// Direction the light travels, normalized at construction.
        direction: Vec3f,
    },
    Point {
        intensity: Vec3f,
        position: Vec3f,
    },
}

impl Light {
    pub fn is_ambient(&self) -> bool {
        matches!(self, Light::Ambient { .. })
    }

    /// Incident radiance at a world point; no distance falloff.
    pub fn illuminate(&self, _p: &Vec3f) -> Vec3f {
        match self {
            Light::Ambient { intensity }
            | Light::Directional { intensity, .. }
            | Light::Point { intensity, .. } => *intensity,
        }
    }

    /// Direction the light travels at a world point; zero for ambient.
    pub fn direction(&self, p: &Vec3f) -> Vec3f {
        match self {
            Light::Ambient { .. } => Vec3f::zeros(),
            Light::Directional { direction, .. } => *direction,
            Light::Point { position, .. } => {
                (p - position).try_normalize(EPS).unwrap_or(Vec3f::zeros())
            }
        }
    }
}

/// Coefficients shared by the Phong and Blinn models. `reflection` and
/// `refraction` are per-channel weights for the recursive terms; `absorption`
/// is the Beer-Lambert coefficient of the interior medium.
#[derive(Clone, Debug)]
pub struct MtlPhongBlinn {
    pub diffuse: Vec3f,
    pub specular: Vec3f,
    pub glossiness: Fp,
    pub reflection: Vec3f,
    pub refraction: Vec3f,
    pub ior: Fp,
    pub absorption: Vec3f,
}

impl Default for MtlPhongBlinn {
    fn default() -> Self {
        MtlPhongBlinn {
            diffuse: Vec3f::new(0.5, 0.5, 0.5),
            specular: Vec3f::new(0.7, 0.7, 0.7),
            glossiness: 20.0,
            reflection: Vec3f::zeros(),
            refraction: Vec3f::zeros(),
            ior: 1.0,
            absorption: Vec3f::zeros(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Material {
    Phong(MtlPhongBlinn),
    Blinn(MtlPhongBlinn),
    Microfacet {
        /// Albedo for dielectrics, F0 for metals.
        base_color: Vec3f,
        roughness: Fp,
        metallic: Fp,
        ior: Fp,
    },
}

impl Default for Material {
    fn default() -> Self {
        Material::Blinn(MtlPhongBlinn::default())
    }
}

/// One node of the scene graph. Children are arena indices into
/// `Scene::nodes`, which keeps the graph strictly tree-shaped; there are no
/// back-edges to cycle through.
#[derive(Clone, Debug)]
pub struct Node {
    /// Diagnostic only.
    pub name: String,
    /// Linear part of the local transform (rotation/scale).
    pub transform: Matrix3<Fp>,
    /// Translation part of the local transform.
    pub position: Vec3f,
    pub object: Option<Object>,
    /// Index into `Scene::materials`.
    pub material: Option<usize>,
    pub children: Vec<usize>,
}

impl Node {
    /// A pure group transform: contributes a coordinate frame to its
    /// descendants and nothing else.
    pub fn group(name: &str, transform: Matrix3<Fp>, position: Vec3f) -> Self {
        Node {
            name: name.to_string(),
            transform,
            position,
            object: None,
            material: None,
            children: vec![],
        }
    }

    pub fn sphere(name: &str, transform: Matrix3<Fp>, position: Vec3f, material: usize) -> Self {
        Node {
            name: name.to_string(),
            transform,
            position,
            object: Some(Object::Sphere),
            material: Some(material),
            children: vec![],
        }
    }

    /// Local transform pre-multiplied into the parent's world transform.
    /// Local applies before parent, so nested scale/rotation is expressed in
    /// the immediate parent's frame.
    pub fn world_transform(&self, parent_tm: &Matrix3<Fp>) -> Matrix3<Fp> {
        parent_tm * self.transform
    }

    pub fn world_position(&self, parent_tm: &Matrix3<Fp>, parent_pos: &Vec3f) -> Vec3f {
        parent_tm * self.position + parent_pos
    }
}

/// The full render input: node arena rooted at `Scene::ROOT`, materials,
/// lights and camera. Immutable once built, shared read-only across worker
/// threads for the whole pass.
#[derive(Clone, Debug)]
pub struct Scene {
    pub nodes: Vec<Node>,
    pub materials: Vec<Material>,
    pub lights: Vec<Light>,
    pub camera: Camera,
    pub bg_color: Vec3f,
    pub ray_depth: i32,
    default_material: Material,
}

impl Scene {
    pub const ROOT: usize = 0;

    pub fn new(camera: Camera) -> Self {
        Scene {
            nodes: vec![Node::group("root", Matrix3::identity(), Vec3f::zeros())],
            materials: vec![],
            lights: vec![],
            camera,
            bg_color: Vec3f::zeros(),
            ray_depth: 5,
            default_material: Material::default(),
        }
    }

    pub fn add_node(&mut self, parent: usize, node: Node) -> usize {
        let index = self.nodes.len();
        self.nodes.push(node);
        self.nodes[parent].children.push(index);
        index
    }

    pub fn add_material(&mut self, material: Material) -> usize {
        self.materials.push(material);
        self.materials.len() - 1
    }

    /// The material bound to a node, falling back to the default gray Blinn.
    pub fn material_of(&self, node: usize) -> &Material {
        self.nodes[node]
            .material
            .and_then(|m| self.materials.get(m))
            .unwrap_or(&self.default_material)
    }

    pub fn bounce_limit(&self) -> i32 {
        self.ray_depth.clamp(0, MAX_RAY_DEPTH)
    }
}
