use arrayvec::ArrayVec;
use nalgebra::Vector3;

pub type Fp = f32;
pub type Vec3f = Vector3<Fp>;

/// Sentinel "infinitely far" distance, also the depth buffer reset value.
pub static BIGFLOAT: Fp = 1.0e30;

/// Minimum local-space distance for a crossing to count as in front of the
/// ray origin. Also the gap below which a root pair is treated as a graze.
pub static SURFACE_EPS: f64 = 1.0e-4;

/// Offset applied along the direction of spawned reflection/refraction rays
/// so they do not immediately re-hit the surface they left.
pub static RAY_OFFSET: Fp = 1.0e-3;

pub static EPS: Fp = 1.0e-5;

#[derive(Clone, Debug)]
pub struct Ray {
    pub origin: Vec3f,
    pub direction: Vec3f,
}

impl Ray {
    pub fn at(&self, t: Fp) -> Vec3f {
        self.origin + self.direction * t
    }
}

/// Which side of a surface an intersection request is interested in;
/// `Back` is for refracted rays looking for their exit crossing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HitSide {
    Front,
    Back,
}

/// An intersection in the primitive's own local space. `normal` is the
/// outward unit normal at the crossing; `front` tells whether the ray was
/// entering (first root) or exiting (second root).
#[derive(Clone, Debug)]
pub struct LocalHit {
    pub t: Fp,
    pub normal: Vec3f,
    pub front: bool,
}

#[derive(Clone, Copy, Debug)]
pub enum Object {
    Sphere,
}

impl Object {
    pub fn intersect(&self, ray: &Ray, side: HitSide) -> Option<LocalHit> {
        let crossings = self.intersect_all_points(ray);
        match side {
            HitSide::Front => crossings.into_iter().next(),
            HitSide::Back => crossings.into_iter().find(|hit| !hit.front),
        }
    }

    /// Both crossings of the ray with the primitive, nearest first, keeping
    /// only those further than `SURFACE_EPS` along the ray. The quadratic is
    /// solved in f64 even though the scene works in f32; grazing rays are
    /// unstable otherwise. The returned distances are local-space parameters
    /// of the (possibly non-unit) ray direction.
    pub fn intersect_all_points(&self, ray: &Ray) -> ArrayVec<LocalHit, 2> {
        match self {
            Object::Sphere => intersect_unit_sphere(ray),
        }
    }
}

fn intersect_unit_sphere(ray: &Ray) -> ArrayVec<LocalHit, 2> {
    let o = ray.origin.cast::<f64>();
    let d = ray.direction.cast::<f64>();
    let a = d.dot(&d);
    let b = 2.0 * d.dot(&o);
    let c = o.dot(&o) - 1.0;
    let discr = b * b - 4.0 * a * c;
    let mut result = ArrayVec::new();
    if discr < 0.0 || a == 0.0 {
        return result;
    }
    let sqrt_discr = discr.sqrt();
    let t0 = (-b - sqrt_discr) / (2.0 * a);
    let t1 = (-b + sqrt_discr) / (2.0 * a);
    // A tangential graze produces a root pair too close together to shade
    // reliably; reject the pair outright.
    if t1 - t0 <= SURFACE_EPS {
        return result;
    }
    if t0 > SURFACE_EPS {
        let t = t0 as Fp;
        result.push(LocalHit {
            t,
            normal: outward_sphere_normal(ray, t),
            front: true,
        });
    }
    if t1 > SURFACE_EPS {
        let t = t1 as Fp;
        result.push(LocalHit {
            t,
            normal: outward_sphere_normal(ray, t),
            front: false,
        });
    }
    result
}

fn outward_sphere_normal(ray: &Ray, t: Fp) -> Vec3f {
    // Unit sphere at the origin: the hit point is its own outward normal.
    let p = ray.at(t);
    p.try_normalize(EPS).unwrap_or(Vec3f::z())
}

/// Mirror `incident` about `normal`; both unit length.
pub fn reflect(incident: &Vec3f, normal: &Vec3f) -> Vec3f {
    incident - normal * (2.0 * incident.dot(normal))
}

/// Snell refraction of a unit `incident` direction at a surface whose unit
/// `normal` faces the incident side (`incident · normal < 0`). Returns `None`
/// on total internal reflection.
pub fn refract(incident: &Vec3f, normal: &Vec3f, eta_i: Fp, eta_t: Fp) -> Option<Vec3f> {
    let eta = eta_i / eta_t;
    let cos_i = -incident.dot(normal);
    let k = 1.0 - eta * eta * (1.0 - cos_i * cos_i);
    if k < 0.0 {
        None
    } else {
        Some(incident * eta + normal * (eta * cos_i - k.sqrt()))
    }
}

/// Schlick's approximation of the Fresnel reflectance between two media.
pub fn fresnel_schlick(cos_i: Fp, eta_i: Fp, eta_t: Fp) -> Fp {
    let f0 = ((eta_i - eta_t) / (eta_i + eta_t)).powi(2);
    f0 + (1.0 - f0) * (1.0 - cos_i.clamp(0.0, 1.0)).powi(5)
}
