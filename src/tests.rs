use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use nalgebra::{Matrix3, Rotation3};

use crate::geometry::{refract, HitSide, Object, Ray, Vec3f, BIGFLOAT};
use crate::raycast::{in_shadow, ray_cast, HitInfo};
use crate::rendering::{pack_color, render_pass, RenderImage, Renderer};
use crate::scene::{Camera, Light, Material, MtlPhongBlinn, Node, Scene};
use crate::shading::{light_visibility, shade, trace};

fn assert_close(a: f32, b: f32, eps: f32) {
    assert!((a - b).abs() < eps, "{} != {} (eps {})", a, b, eps);
}

fn assert_vec_close(a: &Vec3f, b: &Vec3f, eps: f32) {
    assert!((a - b).norm() < eps, "{:?} != {:?} (eps {})", a, b, eps);
}

fn test_camera(width: usize, height: usize) -> Camera {
    Camera {
        position: Vec3f::new(0.0, 0.0, 10.0),
        target: Vec3f::zeros(),
        up: Vec3f::y(),
        fov: 60.0,
        img_width: width,
        img_height: height,
    }
}

fn matte(diffuse: Vec3f) -> Material {
    Material::Phong(MtlPhongBlinn {
        diffuse,
        specular: Vec3f::zeros(),
        glossiness: 1.0,
        ..Default::default()
    })
}

fn single_sphere_scene(material: Material) -> Scene {
    let mut scene = Scene::new(test_camera(16, 12));
    let m = scene.add_material(material);
    scene.add_node(
        Scene::ROOT,
        Node::sphere("sphere", Matrix3::identity(), Vec3f::zeros(), m),
    );
    scene
}

fn axis_ray() -> Ray {
    Ray {
        origin: Vec3f::new(0.0, 0.0, 5.0),
        direction: Vec3f::new(0.0, 0.0, -1.0),
    }
}

fn first_hit(scene: &Scene, ray: &Ray) -> HitInfo {
    ray_cast(scene, ray, HitSide::Front).expect("expected a hit")
}

#[test]
fn sphere_local_front_and_back_roots() {
    let ray = axis_ray();
    let front = Object::Sphere
        .intersect(&ray, HitSide::Front)
        .expect("front hit");
    assert_close(front.t, 4.0, 1e-4);
    assert!(front.front);
    let back = Object::Sphere
        .intersect(&ray, HitSide::Back)
        .expect("back hit");
    assert_close(back.t, 6.0, 1e-4);
    assert!(!back.front);
}

#[test]
fn sphere_axis_hit_through_graph() {
    let scene = single_sphere_scene(Material::default());
    let hit = first_hit(&scene, &axis_ray());
    assert_close(hit.z, 4.0, 1e-4);
    assert!(hit.front);
    assert_vec_close(&hit.normal, &Vec3f::new(0.0, 0.0, 1.0), 1e-4);
    assert_vec_close(&hit.point, &Vec3f::new(0.0, 0.0, 1.0), 1e-4);
}

#[test]
fn miss_yields_background() {
    let mut scene = single_sphere_scene(Material::default());
    scene.bg_color = Vec3f::new(0.2, 0.3, 0.4);
    let ray = Ray {
        origin: Vec3f::new(0.0, 0.0, 5.0),
        direction: Vec3f::new(0.0, 1.0, 0.0),
    };
    assert!(ray_cast(&scene, &ray, HitSide::Front).is_none());
    assert_vec_close(
        &trace(&scene, &ray, HitSide::Front, 5),
        &scene.bg_color,
        1e-6,
    );
}

#[test]
fn tangent_ray_is_rejected() {
    let scene = single_sphere_scene(Material::default());
    let ray = Ray {
        origin: Vec3f::new(0.0, 1.0, 5.0),
        direction: Vec3f::new(0.0, 0.0, -1.0),
    };
    assert!(ray_cast(&scene, &ray, HitSide::Front).is_none());
}

#[test]
fn scaled_sphere_reports_world_distance() {
    // Sphere stretched to radius 2 along z: the local t is scale-dependent,
    // but the reported distance must be measured in world units.
    let mut scene = Scene::new(test_camera(16, 12));
    let m = scene.add_material(Material::default());
    scene.add_node(
        Scene::ROOT,
        Node::sphere(
            "stretched",
            Matrix3::from_diagonal(&Vec3f::new(1.0, 1.0, 2.0)),
            Vec3f::zeros(),
            m,
        ),
    );
    let hit = first_hit(&scene, &axis_ray());
    assert_close(hit.z, 3.0, 1e-3);
    assert_vec_close(&hit.normal, &Vec3f::new(0.0, 0.0, 1.0), 1e-3);
}

#[test]
fn nonuniform_scale_normal_uses_inverse_transpose() {
    let mut scene = Scene::new(test_camera(16, 12));
    let m = scene.add_material(Material::default());
    scene.add_node(
        Scene::ROOT,
        Node::sphere(
            "wide",
            Matrix3::from_diagonal(&Vec3f::new(2.0, 1.0, 1.0)),
            Vec3f::zeros(),
            m,
        ),
    );
    let ray = Ray {
        origin: Vec3f::new(5.0, 0.5, 0.0),
        direction: Vec3f::new(-1.0, 0.0, 0.0),
    };
    let hit = first_hit(&scene, &ray);
    // Gradient of x^2/4 + y^2 + z^2 at the hit point, not the naive
    // transformed sphere normal.
    let expected = Vec3f::new(0.433, 0.5, 0.0).normalize();
    assert_vec_close(&hit.normal, &expected, 2e-3);
    assert_close(hit.normal.norm(), 1.0, 1e-4);
}

#[test]
fn back_side_hit_from_inside() {
    let scene = single_sphere_scene(Material::default());
    let ray = Ray {
        origin: Vec3f::zeros(),
        direction: Vec3f::new(0.0, 0.0, -1.0),
    };
    let hit = ray_cast(&scene, &ray, HitSide::Back).expect("exit hit");
    assert_close(hit.z, 1.0, 1e-4);
    assert!(!hit.front);
    assert_vec_close(&hit.point, &Vec3f::new(0.0, 0.0, -1.0), 1e-4);
}

#[test]
fn staged_transform_composition_matches_direct() {
    let ta = Rotation3::from_axis_angle(&Vec3f::y_axis(), 0.7).into_inner()
        * Matrix3::from_diagonal(&Vec3f::new(2.0, 1.0, 0.5));
    let pa = Vec3f::new(1.0, 2.0, -3.0);
    let tb = Rotation3::from_axis_angle(&Vec3f::x_axis(), -0.3).into_inner();
    let pb = Vec3f::new(0.5, -1.0, 4.0);
    let tc = Matrix3::from_diagonal(&Vec3f::new(0.25, 3.0, 1.5));
    let pc = Vec3f::new(-2.0, 0.0, 1.0);

    let a = Node::group("a", ta, pa);
    let b = Node::group("b", tb, pb);
    let c = Node::group("c", tc, pc);

    // Staged: each node composes onto its parent's cached partial result.
    let identity = Matrix3::identity();
    let wa = a.world_transform(&identity);
    let pa_w = a.world_position(&identity, &Vec3f::zeros());
    let wb = b.world_transform(&wa);
    let pb_w = b.world_position(&wa, &pa_w);
    let wc = c.world_transform(&wb);
    let pc_w = c.world_position(&wb, &pb_w);

    // Direct accumulation from the root.
    let direct_tm = ta * tb * tc;
    let direct_pos = ta * (tb * pc + pb) + pa;

    assert!((wc - direct_tm).norm() < 1e-4);
    assert_vec_close(&pc_w, &direct_pos, 1e-4);
    assert!((wb - ta * tb).norm() < 1e-4);
}

fn shadow_test_scene(with_occluder: bool) -> Scene {
    let mut scene = Scene::new(test_camera(16, 12));
    scene.lights.push(Light::Point {
        intensity: Vec3f::new(1.0, 1.0, 1.0),
        position: Vec3f::new(3.0, 4.0, 0.0),
    });
    let red = scene.add_material(matte(Vec3f::new(0.8, 0.2, 0.1)));
    scene.add_node(
        Scene::ROOT,
        Node::sphere("shaded", Matrix3::identity(), Vec3f::zeros(), red),
    );
    if with_occluder {
        let m = scene.add_material(Material::default());
        scene.add_node(
            Scene::ROOT,
            Node::sphere(
                "occluder",
                Matrix3::identity() * 0.3,
                Vec3f::new(1.5, 2.5, 0.0),
                m,
            ),
        );
    }
    scene
}

#[test]
fn occluder_zeroes_point_light_contribution() {
    // Shade the top of the unit sphere; the occluder sits halfway between it
    // and the light but off the primary ray.
    let ray = Ray {
        origin: Vec3f::new(0.0, 5.0, 0.0),
        direction: Vec3f::new(0.0, -1.0, 0.0),
    };

    let occluded = shadow_test_scene(true);
    let hit = first_hit(&occluded, &ray);
    assert_vec_close(&hit.point, &Vec3f::new(0.0, 1.0, 0.0), 1e-4);
    assert_close(light_visibility(&occluded, &hit.point, &occluded.lights[0]), 0.0, 1e-6);
    assert_vec_close(&shade(&occluded, &ray, &hit, 5), &Vec3f::zeros(), 1e-6);

    let open = shadow_test_scene(false);
    let hit = first_hit(&open, &ray);
    assert_close(light_visibility(&open, &hit.point, &open.lights[0]), 1.0, 1e-6);
    let color = shade(&open, &ray, &hit, 5);
    assert!(color.x > 0.1, "diffuse term missing: {:?}", color);
}

#[test]
fn shadow_tester_does_not_self_shadow() {
    let scene = shadow_test_scene(false);
    let shadow_ray = Ray {
        origin: Vec3f::new(0.0, 1.0, 0.0),
        direction: Vec3f::new(3.0, 3.0, 0.0).normalize(),
    };
    assert!(!in_shadow(&scene, &shadow_ray, BIGFLOAT));
}

#[test]
fn zero_coefficients_make_shade_bounce_independent() {
    let mut scene = shadow_test_scene(false);
    scene.lights.push(Light::Ambient {
        intensity: Vec3f::new(0.1, 0.1, 0.1),
    });
    let ray = Ray {
        origin: Vec3f::new(0.0, 5.0, 0.0),
        direction: Vec3f::new(0.0, -1.0, 0.0),
    };
    let hit = first_hit(&scene, &ray);
    let shallow = shade(&scene, &ray, &hit, 1);
    let deep = shade(&scene, &ray, &hit, 8);
    assert!(shallow.x > 0.0);
    assert_eq!(shallow, deep);
}

#[test]
fn refraction_at_normal_incidence_is_straight() {
    let incident = Vec3f::new(0.0, 0.0, -1.0);
    let normal = Vec3f::new(0.0, 0.0, 1.0);
    let refracted = refract(&incident, &normal, 1.0, 1.5).expect("no TIR at normal incidence");
    assert_vec_close(&refracted, &incident, 1e-6);
}

#[test]
fn total_internal_reflection_past_critical_angle() {
    // 60 degrees inside glass is past the ~41.8 degree critical angle.
    let incident = Vec3f::new(0.866, 0.0, -0.5);
    let normal = Vec3f::new(0.0, 0.0, 1.0);
    assert!(refract(&incident, &normal, 1.5, 1.0).is_none());
}

#[test]
fn glass_sphere_passes_background_straight_through() {
    let mut scene = single_sphere_scene(Material::Phong(MtlPhongBlinn {
        diffuse: Vec3f::zeros(),
        specular: Vec3f::zeros(),
        glossiness: 1.0,
        refraction: Vec3f::new(1.0, 1.0, 1.0),
        ior: 1.5,
        absorption: Vec3f::zeros(),
        ..Default::default()
    }));
    scene.bg_color = Vec3f::new(0.25, 0.5, 0.75);
    // Normal incidence through the center: both transitions leave the ray
    // undeviated and nothing is absorbed, so the background survives.
    let color = trace(&scene, &axis_ray(), HitSide::Front, 6);
    assert_vec_close(&color, &scene.bg_color, 1e-3);
}

#[test]
fn glass_exit_adds_no_direct_lighting() {
    let mut scene = single_sphere_scene(Material::Phong(MtlPhongBlinn {
        diffuse: Vec3f::new(0.5, 0.0, 0.0),
        specular: Vec3f::zeros(),
        glossiness: 1.0,
        refraction: Vec3f::new(1.0, 1.0, 1.0),
        ior: 1.5,
        absorption: Vec3f::zeros(),
        ..Default::default()
    }));
    scene.bg_color = Vec3f::new(0.1, 0.2, 0.3);
    // The light faces away from the entry point but hits the exit point
    // head-on. Shading the exit interface would add a red diffuse term; the
    // through color must stay exactly the background.
    scene.lights.push(Light::Directional {
        intensity: Vec3f::new(1.0, 1.0, 1.0),
        direction: Vec3f::new(0.0, 0.0, 1.0),
    });
    let color = trace(&scene, &axis_ray(), HitSide::Front, 6);
    assert_vec_close(&color, &scene.bg_color, 1e-3);
}

#[test]
fn microfacet_normal_incidence_matches_closed_form() {
    let base = Vec3f::new(1.0, 0.5, 0.25);
    let mut scene = single_sphere_scene(Material::Microfacet {
        base_color: base,
        roughness: 1.0,
        metallic: 1.0,
        ior: 1.5,
    });
    scene.lights.push(Light::Directional {
        intensity: Vec3f::new(1.0, 1.0, 1.0),
        direction: Vec3f::new(0.0, 0.0, -1.0),
    });
    let ray = axis_ray();
    let hit = first_hit(&scene, &ray);
    // L = V = H = N, so D = 1/(pi*alpha^2) = 1/pi, G = 1 and F = base color.
    // A full metal has no diffuse lobe, leaving base / (4*pi).
    let expected = base / (4.0 * std::f32::consts::PI);
    assert_vec_close(&shade(&scene, &ray, &hit, 5), &expected, 1e-4);
}

#[test]
fn microfacet_zero_roughness_stays_finite() {
    let mut scene = single_sphere_scene(Material::Microfacet {
        base_color: Vec3f::new(0.6, 0.6, 0.6),
        roughness: 0.0,
        metallic: 0.0,
        ior: 1.5,
    });
    scene.lights.push(Light::Directional {
        intensity: Vec3f::new(1.0, 1.0, 1.0),
        direction: Vec3f::new(0.0, 0.0, -1.0),
    });
    let ray = axis_ray();
    let hit = first_hit(&scene, &ray);
    // The distribution denominator collapses to zero at alpha = 0; the
    // result must still be a finite color with the diffuse lobe intact.
    let color = shade(&scene, &ray, &hit, 5);
    assert!(color.iter().all(|c| c.is_finite()), "{:?}", color);
    assert!(color.x > 0.0);
}

#[test]
fn microfacet_skips_lights_below_horizon() {
    let mut scene = single_sphere_scene(Material::Microfacet {
        base_color: Vec3f::new(0.9, 0.9, 0.9),
        roughness: 0.4,
        metallic: 0.5,
        ior: 1.5,
    });
    // Travelling +z, the light reaches the shaded point from behind.
    scene.lights.push(Light::Directional {
        intensity: Vec3f::new(1.0, 1.0, 1.0),
        direction: Vec3f::new(0.0, 0.0, 1.0),
    });
    let ray = axis_ray();
    let hit = first_hit(&scene, &ray);
    assert_vec_close(&shade(&scene, &ray, &hit, 5), &Vec3f::zeros(), 1e-6);
}

#[test]
fn missing_material_falls_back_to_default() {
    let mut with_default = Scene::new(test_camera(16, 12));
    with_default.lights.push(Light::Directional {
        intensity: Vec3f::new(0.8, 0.8, 0.8),
        direction: Vec3f::new(0.0, 0.0, -1.0),
    });
    let m = with_default.add_material(Material::default());
    with_default.add_node(
        Scene::ROOT,
        Node::sphere("explicit", Matrix3::identity(), Vec3f::zeros(), m),
    );

    let mut without = with_default.clone();
    without.nodes[1].material = None;

    let ray = axis_ray();
    let explicit = shade(&with_default, &ray, &first_hit(&with_default, &ray), 5);
    let fallback = shade(&without, &ray, &first_hit(&without, &ray), 5);
    assert_eq!(explicit, fallback);
    assert!(fallback.iter().all(|c| c.is_finite()));
}

fn render_test_scene() -> Scene {
    let mut scene = single_sphere_scene(matte(Vec3f::new(0.9, 0.4, 0.2)));
    scene.bg_color = Vec3f::new(0.1, 0.2, 0.3);
    scene.lights.push(Light::Directional {
        intensity: Vec3f::new(1.0, 1.0, 1.0),
        direction: Vec3f::new(0.0, 0.0, -1.0),
    });
    scene
}

#[test]
fn full_frame_completion_and_buffers() {
    let scene = render_test_scene();
    let image = RenderImage::new(scene.camera.img_width, scene.camera.img_height);
    render_pass(&scene, &image, &AtomicBool::new(false));

    assert!(image.is_render_done());
    assert_eq!(image.rendered_pixels(), image.total_pixels());

    let packed_bg = pack_color(&scene.bg_color);
    let bg_bytes = [
        (packed_bg >> 16) as u8,
        (packed_bg >> 8) as u8,
        packed_bg as u8,
    ];
    // Corner rays miss the sphere, the center ray hits it.
    assert_eq!(image.pixel(0, 0), bg_bytes);
    assert_close(image.depth_at(0, 0), BIGFLOAT, 1.0);
    let center_depth = image.depth_at(7, 5);
    assert!(center_depth > 8.0 && center_depth < 10.0, "depth {}", center_depth);

    // Every pixel is either background-with-sentinel-depth or hit-derived.
    for y in 0..image.height() {
        for x in 0..image.width() {
            let depth = image.depth_at(x, y);
            if depth >= BIGFLOAT {
                assert_eq!(image.pixel(x, y), bg_bytes);
            } else {
                assert!(depth > 0.0);
            }
        }
    }
}

#[test]
fn render_is_deterministic_across_passes() {
    let scene = render_test_scene();
    let first = RenderImage::new(scene.camera.img_width, scene.camera.img_height);
    let second = RenderImage::new(scene.camera.img_width, scene.camera.img_height);
    // Each pass shuffles its own visitation order; per-pixel results must not
    // depend on it.
    render_pass(&scene, &first, &AtomicBool::new(false));
    render_pass(&scene, &second, &AtomicBool::new(false));
    for y in 0..first.height() {
        for x in 0..first.width() {
            assert_eq!(first.pixel(x, y), second.pixel(x, y));
            assert_eq!(first.depth_at(x, y).to_bits(), second.depth_at(x, y).to_bits());
        }
    }
}

#[test]
fn renderer_lifecycle_begin_stop_wait() {
    let scene = Arc::new(render_test_scene());
    let image = Arc::new(RenderImage::new(
        scene.camera.img_width,
        scene.camera.img_height,
    ));
    let mut renderer = Renderer::new();

    renderer.begin_render(Arc::clone(&scene), Arc::clone(&image));
    assert!(renderer.is_rendering());
    // A second begin while running is refused, not fatal.
    renderer.begin_render(Arc::clone(&scene), Arc::clone(&image));
    renderer.stop_render();
    assert!(!renderer.is_rendering());
    assert!(image.rendered_pixels() <= image.total_pixels());

    renderer.begin_render(Arc::clone(&scene), Arc::clone(&image));
    renderer.wait();
    assert!(image.is_render_done());
}

#[test]
fn ambient_light_ignores_occlusion() {
    let mut scene = shadow_test_scene(true);
    scene.lights.clear();
    scene.lights.push(Light::Ambient {
        intensity: Vec3f::new(0.3, 0.3, 0.3),
    });
    let ray = Ray {
        origin: Vec3f::new(0.0, 5.0, 0.0),
        direction: Vec3f::new(0.0, -1.0, 0.0),
    };
    let hit = first_hit(&scene, &ray);
    let color = shade(&scene, &ray, &hit, 5);
    // diffuse * intensity, no geometric terms, no shadow test.
    assert_vec_close(&color, &Vec3f::new(0.8 * 0.3, 0.2 * 0.3, 0.1 * 0.3), 1e-6);
}
