use nalgebra::Matrix3;

use crate::geometry::{Fp, HitSide, Ray, Vec3f, EPS, SURFACE_EPS};
use crate::scene::Scene;

/// The globally closest intersection, reconstructed in world space.
#[derive(Clone, Debug)]
pub struct HitInfo {
    /// World-space distance from the ray origin, comparable across nodes of
    /// differing local scale.
    pub z: Fp,
    pub point: Vec3f,
    /// World-space unit normal, always pointing out of the primitive.
    pub normal: Vec3f,
    /// Whether the ray struck the surface from outside.
    pub front: bool,
    /// Arena index of the node that was hit; used to fetch its material.
    pub node: usize,
}

/// Walk the whole graph and return the closest surviving hit, or `None` when
/// nothing is hit. Traversal starts at the root with the identity frame.
pub fn ray_cast(scene: &Scene, ray: &Ray, side: HitSide) -> Option<HitInfo> {
    let mut closest: Option<HitInfo> = None;
    visit(
        scene,
        Scene::ROOT,
        ray,
        &Matrix3::identity(),
        &Vec3f::zeros(),
        side,
        &mut closest,
    );
    closest
}

fn visit(
    scene: &Scene,
    node_index: usize,
    ray: &Ray,
    parent_tm: &Matrix3<Fp>,
    parent_pos: &Vec3f,
    side: HitSide,
    closest: &mut Option<HitInfo>,
) {
    let node = &scene.nodes[node_index];
    let world_tm = node.world_transform(parent_tm);
    let world_pos = node.world_position(parent_tm, parent_pos);
    if let Some(object) = &node.object {
        if let Some(itm) = world_tm.try_inverse() {
            // The local direction is deliberately left unnormalized so the
            // primitive's t stays in this node's local scale; the distance
            // used for the closest-hit comparison is recomputed in world
            // space below, which is what keeps nonuniformly scaled nodes
            // comparable.
            let local_ray = Ray {
                origin: itm * (ray.origin - world_pos),
                direction: itm * ray.direction,
            };
            if let Some(local_hit) = object.intersect(&local_ray, side) {
                let local_point = local_ray.at(local_hit.t);
                let world_point = world_tm * local_point + world_pos;
                let t_world = (world_point - ray.origin).norm();
                if closest.as_ref().map_or(true, |hit| t_world < hit.z) {
                    // Inverse-transpose keeps normals perpendicular under
                    // nonuniform scale.
                    let normal = (itm.transpose() * local_hit.normal)
                        .try_normalize(EPS)
                        .unwrap_or(local_hit.normal);
                    *closest = Some(HitInfo {
                        z: t_world,
                        point: world_point,
                        normal,
                        front: local_hit.front,
                        node: node_index,
                    });
                }
            }
        } else {
            log::debug!("skipping node '{}': singular transform", node.name);
        }
    }
    for &child in &scene.nodes[node_index].children {
        visit(scene, child, ray, &world_tm, &world_pos, side, closest);
    }
}

/// Restricted intersector for shadow rays: true as soon as anything blocks
/// the ray strictly between the origin and `t_max`. The lower bound of the
/// interval doubles as the self-shadowing bias and is the same for every
/// light kind. The distance compared against `t_max` is the primitive's
/// local-space t, matching how the direct intersector hands distances out.
pub fn in_shadow(scene: &Scene, ray: &Ray, t_max: Fp) -> bool {
    shadow_visit(
        scene,
        Scene::ROOT,
        ray,
        &Matrix3::identity(),
        &Vec3f::zeros(),
        t_max,
    )
}

fn shadow_visit(
    scene: &Scene,
    node_index: usize,
    ray: &Ray,
    parent_tm: &Matrix3<Fp>,
    parent_pos: &Vec3f,
    t_max: Fp,
) -> bool {
    let node = &scene.nodes[node_index];
    let world_tm = node.world_transform(parent_tm);
    let world_pos = node.world_position(parent_tm, parent_pos);
    if let Some(object) = &node.object {
        if let Some(itm) = world_tm.try_inverse() {
            let local_ray = Ray {
                origin: itm * (ray.origin - world_pos),
                direction: itm * ray.direction,
            };
            if let Some(local_hit) = object.intersect(&local_ray, HitSide::Front) {
                if local_hit.t > SURFACE_EPS as Fp && local_hit.t < t_max {
                    return true;
                }
            }
        }
    }
    scene.nodes[node_index]
        .children
        .iter()
        .any(|&child| shadow_visit(scene, child, ray, &world_tm, &world_pos, t_max))
}
