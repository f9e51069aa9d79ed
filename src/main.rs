mod geometry;
mod raycast;
mod rendering;
mod scene;
mod shading;
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use nalgebra::{Matrix3, Rotation3};

use crate::geometry::Vec3f;
use crate::rendering::{RenderImage, Renderer};
use crate::scene::{Camera, Light, Material, MtlPhongBlinn, Node, Scene};

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    let out_path = args
        .iter()
        .skip(1)
        .find(|arg| !arg.starts_with("--"))
        .cloned()
        .unwrap_or_else(|| "output.png".to_string());
    let srgb = args.iter().any(|arg| arg == "--srgb");

    let scene = Arc::new(build_demo_scene());
    let image = Arc::new(RenderImage::new(
        scene.camera.img_width,
        scene.camera.img_height,
    ));

    let mut renderer = Renderer::new();
    renderer.begin_render(Arc::clone(&scene), Arc::clone(&image));

    let progress = ProgressBar::new(image.total_pixels() as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} pixels ({eta})")
            .expect("bad progress template"),
    );
    while !image.is_render_done() {
        progress.set_position(image.rendered_pixels() as u64);
        std::thread::sleep(Duration::from_millis(50));
    }
    progress.finish_and_clear();
    renderer.wait();

    image
        .to_image(srgb)
        .save(&out_path)
        .expect("Failed writing image");
    println!("wrote {}", out_path);
}

/// A small hierarchical scene exercising every material and light kind:
/// a flattened floor sphere, a glass sphere, a rough metal sphere, and a
/// tilted group holding a glossy red sphere and a stretched mirror.
fn build_demo_scene() -> Scene {
    let camera = Camera {
        position: Vec3f::new(0.0, 4.0, 14.0),
        target: Vec3f::new(0.0, 1.0, 0.0),
        up: Vec3f::y(),
        fov: 40.0,
        img_width: 800,
        img_height: 600,
    };
    let mut scene = Scene::new(camera);
    scene.bg_color = Vec3f::new(0.05, 0.07, 0.12);
    scene.ray_depth = 5;

    scene.lights.push(Light::Ambient {
        intensity: Vec3f::new(0.08, 0.08, 0.1),
    });
    scene.lights.push(Light::Directional {
        intensity: Vec3f::new(0.7, 0.7, 0.65),
        direction: Vec3f::new(-0.4, -1.0, -0.3).normalize(),
    });
    scene.lights.push(Light::Point {
        intensity: Vec3f::new(0.9, 0.85, 0.8),
        position: Vec3f::new(6.0, 8.0, 6.0),
    });

    let floor = scene.add_material(Material::Blinn(MtlPhongBlinn {
        diffuse: Vec3f::new(0.4, 0.4, 0.42),
        specular: Vec3f::new(0.1, 0.1, 0.1),
        glossiness: 10.0,
        ..Default::default()
    }));
    let red = scene.add_material(Material::Phong(MtlPhongBlinn {
        diffuse: Vec3f::new(0.7, 0.12, 0.1),
        specular: Vec3f::new(0.8, 0.8, 0.8),
        glossiness: 40.0,
        ..Default::default()
    }));
    let mirror = scene.add_material(Material::Blinn(MtlPhongBlinn {
        diffuse: Vec3f::new(0.05, 0.05, 0.08),
        specular: Vec3f::new(0.9, 0.9, 0.9),
        glossiness: 200.0,
        reflection: Vec3f::new(0.8, 0.8, 0.8),
        ..Default::default()
    }));
    let glass = scene.add_material(Material::Blinn(MtlPhongBlinn {
        diffuse: Vec3f::zeros(),
        specular: Vec3f::new(0.2, 0.2, 0.2),
        glossiness: 120.0,
        refraction: Vec3f::new(0.95, 0.95, 0.95),
        ior: 1.5,
        absorption: Vec3f::new(0.02, 0.01, 0.0),
        ..Default::default()
    }));
    let gold = scene.add_material(Material::Microfacet {
        base_color: Vec3f::new(1.0, 0.77, 0.34),
        roughness: 0.3,
        metallic: 1.0,
        ior: 1.5,
    });

    scene.add_node(
        Scene::ROOT,
        Node::sphere(
            "floor",
            Matrix3::from_diagonal(&Vec3f::new(20.0, 0.5, 20.0)),
            Vec3f::new(0.0, -0.5, 0.0),
            floor,
        ),
    );
    scene.add_node(
        Scene::ROOT,
        Node::sphere(
            "glass",
            Matrix3::identity() * 1.2,
            Vec3f::new(0.0, 1.2, 4.0),
            glass,
        ),
    );
    scene.add_node(
        Scene::ROOT,
        Node::sphere("gold", Matrix3::identity(), Vec3f::new(-2.8, 1.0, 0.0), gold),
    );

    let tilt = Rotation3::from_axis_angle(&Vec3f::y_axis(), 0.6).into_inner()
        * Rotation3::from_axis_angle(&Vec3f::z_axis(), 0.25).into_inner();
    let pair = scene.add_node(
        Scene::ROOT,
        Node::group("pair", tilt, Vec3f::new(2.6, 1.2, -1.0)),
    );
    scene.add_node(
        pair,
        Node::sphere("pair/red", Matrix3::identity() * 0.9, Vec3f::zeros(), red),
    );
    scene.add_node(
        pair,
        Node::sphere(
            "pair/mirror",
            Matrix3::from_diagonal(&Vec3f::new(0.7, 1.4, 0.7)),
            Vec3f::new(1.8, 0.6, 0.0),
            mirror,
        ),
    );

    scene
}
