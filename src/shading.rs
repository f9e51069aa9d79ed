use std::f32::consts::PI;

use crate::geometry::{
    fresnel_schlick, reflect, refract, Fp, HitSide, Ray, Vec3f, BIGFLOAT, EPS, RAY_OFFSET,
};
use crate::raycast::{in_shadow, ray_cast, HitInfo};
use crate::scene::{Light, Material, MtlPhongBlinn, Scene};

/// Trace a ray into the scene and shade whatever it hits. Exhausting the
/// bounce budget yields black; missing everything yields the background.
pub fn trace(scene: &Scene, ray: &Ray, side: HitSide, bounces: i32) -> Vec3f {
    if bounces <= 0 {
        return Vec3f::zeros();
    }
    match ray_cast(scene, ray, side) {
        Some(hit) => shade(scene, ray, &hit, bounces),
        None => scene.bg_color,
    }
}

/// Evaluate the hit node's material. `bounces` is the remaining recursion
/// budget including this surface.
pub fn shade(scene: &Scene, ray: &Ray, hit: &HitInfo, bounces: i32) -> Vec3f {
    match scene.material_of(hit.node) {
        Material::Phong(m) => shade_phong(scene, ray, hit, m, bounces),
        Material::Blinn(m) => shade_blinn(scene, ray, hit, m, bounces),
        Material::Microfacet {
            base_color,
            roughness,
            metallic,
            ..
        } => shade_microfacet(scene, ray, hit, base_color, *roughness, *metallic),
    }
}

/// Fraction of a light that reaches a world point: 1.0 unoccluded, 0.0 in
/// shadow. Ambient lights have no direction and are never occluded.
pub fn light_visibility(scene: &Scene, point: &Vec3f, light: &Light) -> Fp {
    let (direction, t_max) = match light {
        Light::Ambient { .. } => return 1.0,
        // Directional lights are infinitely far; a large finite bound stands
        // in for infinity.
        Light::Directional { direction, .. } => (-direction, BIGFLOAT),
        Light::Point { position, .. } => {
            let to_light = position - point;
            let dist = to_light.norm();
            if dist <= EPS {
                return 1.0;
            }
            (to_light / dist, dist)
        }
    };
    let shadow_ray = Ray {
        origin: *point,
        direction,
    };
    if in_shadow(scene, &shadow_ray, t_max) {
        0.0
    } else {
        1.0
    }
}

fn shade_phong(scene: &Scene, ray: &Ray, hit: &HitInfo, m: &MtlPhongBlinn, bounces: i32) -> Vec3f {
    let mut color = direct_phong_blinn(scene, ray, hit, m, SpecularModel::ReflectionVector);
    let incident = match ray.direction.try_normalize(EPS) {
        Some(i) => i,
        None => return color,
    };
    // Phong policy: the fixed material colors weight the recursive terms.
    if bounces > 1 && m.reflection.norm() > EPS {
        color += m
            .reflection
            .component_mul(&trace_reflection(scene, &incident, hit, bounces));
    }
    if bounces > 1 && m.refraction.norm() > EPS {
        color += m
            .refraction
            .component_mul(&trace_refraction(scene, &incident, hit, m, bounces));
    }
    color
}

fn shade_blinn(scene: &Scene, ray: &Ray, hit: &HitInfo, m: &MtlPhongBlinn, bounces: i32) -> Vec3f {
    let mut color = direct_phong_blinn(scene, ray, hit, m, SpecularModel::HalfVector);
    let incident = match ray.direction.try_normalize(EPS) {
        Some(i) => i,
        None => return color,
    };
    if bounces <= 1 {
        return color;
    }
    if m.refraction.norm() > EPS {
        // Blinn policy: reflected and refracted energy split by the Fresnel
        // reflectance of the actual interface, not by the material colors.
        let (eta_i, eta_t, normal) = refraction_interface(hit, m.ior);
        let cos_i = (-incident.dot(&normal)).max(0.0);
        let f = if refract(&incident, &normal, eta_i, eta_t).is_none() {
            1.0
        } else {
            fresnel_schlick(cos_i, eta_i, eta_t)
        };
        color += trace_reflection(scene, &incident, hit, bounces) * f;
        if f < 1.0 - EPS {
            color += trace_refraction(scene, &incident, hit, m, bounces) * (1.0 - f);
        }
    } else if m.reflection.norm() > EPS {
        // Without a refractive interface there is no index pair to take a
        // Fresnel weight from (ior defaults to 1, F would vanish head-on),
        // so a plain mirror keeps its fixed reflection color.
        color += m
            .reflection
            .component_mul(&trace_reflection(scene, &incident, hit, bounces));
    }
    color
}

enum SpecularModel {
    /// Phong: compare the mirrored light direction to the view direction.
    ReflectionVector,
    /// Blinn: compare the half vector to the normal.
    HalfVector,
}

fn direct_phong_blinn(
    scene: &Scene,
    ray: &Ray,
    hit: &HitInfo,
    m: &MtlPhongBlinn,
    model: SpecularModel,
) -> Vec3f {
    let mut color = Vec3f::zeros();
    let view = (-ray.direction).try_normalize(EPS).unwrap_or(hit.normal);
    for light in &scene.lights {
        let intensity = light.illuminate(&hit.point);
        if light.is_ambient() {
            color += m.diffuse.component_mul(&intensity);
            continue;
        }
        let visibility = light_visibility(scene, &hit.point, light);
        if visibility <= 0.0 {
            continue;
        }
        let l = -light.direction(&hit.point);
        let n_dot_l = hit.normal.dot(&l);
        color += m.diffuse.component_mul(&intensity) * (n_dot_l.max(0.0) * visibility);
        let spec_cos = match model {
            SpecularModel::ReflectionVector => {
                let r = hit.normal * (2.0 * n_dot_l) - l;
                r.dot(&view).max(0.0)
            }
            SpecularModel::HalfVector => match (l + view).try_normalize(EPS) {
                Some(h) => hit.normal.dot(&h).max(0.0),
                None => 0.0,
            },
        };
        color +=
            m.specular.component_mul(&intensity) * (spec_cos.powf(m.glossiness) * visibility);
    }
    color
}

/// Cook-Torrance with GGX distribution, Schlick-GGX geometry and Schlick
/// Fresnel. Purely direct; the model spawns no recursive rays.
fn shade_microfacet(
    scene: &Scene,
    ray: &Ray,
    hit: &HitInfo,
    base_color: &Vec3f,
    roughness: Fp,
    metallic: Fp,
) -> Vec3f {
    let mut color = Vec3f::zeros();
    let n = hit.normal;
    let view = (-ray.direction).try_normalize(EPS).unwrap_or(n);
    let alpha = roughness * roughness;
    let alpha2 = alpha * alpha;
    let k = (roughness + 1.0).powi(2) / 8.0;
    let f0 = Vec3f::new(0.04, 0.04, 0.04).lerp(base_color, metallic);
    for light in &scene.lights {
        let intensity = light.illuminate(&hit.point);
        if light.is_ambient() {
            color += base_color.component_mul(&intensity);
            continue;
        }
        let l = -light.direction(&hit.point);
        let n_dot_l = n.dot(&l);
        if n_dot_l <= 0.0 {
            continue;
        }
        let visibility = light_visibility(scene, &hit.point, light);
        if visibility <= 0.0 {
            continue;
        }
        let h = match (l + view).try_normalize(EPS) {
            Some(h) => h,
            None => continue,
        };
        let n_dot_v = n.dot(&view).max(0.0);
        let n_dot_h = n.dot(&h).max(0.0);
        let v_dot_h = view.dot(&h).max(0.0);
        let fresnel = f0 + (Vec3f::new(1.0, 1.0, 1.0) - f0) * (1.0 - v_dot_h).powi(5);
        let d_denom = n_dot_h * n_dot_h * (alpha2 - 1.0) + 1.0;
        let d = alpha2 / (PI * d_denom * d_denom).max(EPS);
        let g = geometry_schlick_ggx(n_dot_l, k) * geometry_schlick_ggx(n_dot_v, k);
        let specular = fresnel * (d * g / (4.0 * n_dot_l * n_dot_v).max(EPS));
        let kd = (Vec3f::new(1.0, 1.0, 1.0) - fresnel) * (1.0 - metallic);
        let diffuse = kd.component_mul(base_color) / PI;
        color += (diffuse + specular).component_mul(&intensity) * (n_dot_l * visibility);
    }
    color
}

fn geometry_schlick_ggx(cos: Fp, k: Fp) -> Fp {
    cos / (cos * (1.0 - k) + k).max(EPS)
}

/// Index pair and incident-facing normal for the interface being crossed,
/// from the hit's front/back flag: entering air→medium on a front hit,
/// exiting medium→air on a back hit.
fn refraction_interface(hit: &HitInfo, ior: Fp) -> (Fp, Fp, Vec3f) {
    if hit.front {
        (1.0, ior, hit.normal)
    } else {
        (ior, 1.0, -hit.normal)
    }
}

fn trace_reflection(scene: &Scene, incident: &Vec3f, hit: &HitInfo, bounces: i32) -> Vec3f {
    let normal = if hit.front { hit.normal } else { -hit.normal };
    let reflected = reflect(incident, &normal);
    let ray = Ray {
        origin: hit.point + reflected * RAY_OFFSET,
        direction: reflected,
    };
    // A reflection off a back face stays inside the medium and must keep
    // looking for exit crossings.
    let side = if hit.front {
        HitSide::Front
    } else {
        HitSide::Back
    };
    trace(scene, &ray, side, bounces - 1)
}

/// Radiance arriving through the surface by refraction, before any material
/// weighting. Total internal reflection redirects to the reflection term.
fn trace_refraction(
    scene: &Scene,
    incident: &Vec3f,
    hit: &HitInfo,
    m: &MtlPhongBlinn,
    bounces: i32,
) -> Vec3f {
    let (eta_i, eta_t, normal) = refraction_interface(hit, m.ior);
    match refract(incident, &normal, eta_i, eta_t) {
        None => trace_reflection(scene, incident, hit, bounces),
        Some(transmitted) if hit.front => {
            // Entering the medium: walk to the exit crossing, attenuate by
            // Beer-Lambert over the interior distance, and continue with the
            // refraction term alone. The exit interface contributes no
            // direct lighting of its own.
            let interior = Ray {
                origin: hit.point + transmitted * RAY_OFFSET,
                direction: transmitted,
            };
            match ray_cast(scene, &interior, HitSide::Back) {
                Some(exit) => {
                    let transmittance = (m.absorption * exit.z).map(|x| (-x).exp());
                    transmittance.component_mul(&trace_refraction(
                        scene,
                        &transmitted,
                        &exit,
                        m,
                        bounces - 1,
                    ))
                }
                None => scene.bg_color,
            }
        }
        Some(transmitted) => {
            // Exiting back into air.
            let ray = Ray {
                origin: hit.point + transmitted * RAY_OFFSET,
                direction: transmitted,
            };
            trace(scene, &ray, HitSide::Front, bounces - 1)
        }
    }
}
