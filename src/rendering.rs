use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use image::RgbImage;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::geometry::{Fp, HitSide, Ray, Vec3f, BIGFLOAT, EPS};
use crate::raycast::ray_cast;
use crate::scene::{Camera, Scene};
use crate::shading::shade;

/// Shared render target: 24-bit color, depth, and a monotonically increasing
/// count of completed pixels. Workers write disjoint pixel indices; everything
/// is atomic so the buffers can be polled by a display or progress reader
/// while a pass is still running.
pub struct RenderImage {
    width: usize,
    height: usize,
    /// Packed 0x00RRGGBB per pixel, row-major, top row first.
    pixels: Vec<AtomicU32>,
    /// World-space hit distance as f32 bits; `BIGFLOAT` where nothing was hit.
    depth: Vec<AtomicU32>,
    rendered: AtomicUsize,
}

impl RenderImage {
    pub fn new(width: usize, height: usize) -> Self {
        let image = RenderImage {
            width,
            height,
            pixels: (0..width * height).map(|_| AtomicU32::new(0)).collect(),
            depth: (0..width * height).map(|_| AtomicU32::new(0)).collect(),
            rendered: AtomicUsize::new(0),
        };
        image.reset();
        image
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn total_pixels(&self) -> usize {
        self.width * self.height
    }

    /// Clear the pass state: depth back to the far sentinel, counter to zero.
    pub fn reset(&self) {
        for pixel in &self.pixels {
            pixel.store(0, Ordering::Relaxed);
        }
        for depth in &self.depth {
            depth.store(BIGFLOAT.to_bits(), Ordering::Relaxed);
        }
        self.rendered.store(0, Ordering::Release);
    }

    fn put_pixel(&self, index: usize, color: Vec3f, depth: Fp) {
        self.pixels[index].store(pack_color(&color), Ordering::Relaxed);
        self.depth[index].store(depth.to_bits(), Ordering::Relaxed);
        self.rendered.fetch_add(1, Ordering::Release);
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let packed = self.pixels[y * self.width + x].load(Ordering::Acquire);
        [(packed >> 16) as u8, (packed >> 8) as u8, packed as u8]
    }

    pub fn depth_at(&self, x: usize, y: usize) -> Fp {
        Fp::from_bits(self.depth[y * self.width + x].load(Ordering::Acquire))
    }

    pub fn rendered_pixels(&self) -> usize {
        self.rendered.load(Ordering::Acquire)
    }

    pub fn is_render_done(&self) -> bool {
        self.rendered_pixels() == self.total_pixels()
    }

    /// Copy out the color buffer, row-major top-to-bottom. The sRGB encoding
    /// is a pure post-process toggle; the stored values stay linear.
    pub fn to_image(&self, srgb: bool) -> RgbImage {
        let mut img = RgbImage::new(self.width as u32, self.height as u32);
        for y in 0..self.height {
            for x in 0..self.width {
                let mut rgb = self.pixel(x, y);
                if srgb {
                    for channel in &mut rgb {
                        *channel =
                            (srgb_encode(*channel as Fp / 255.0) * 255.0).round() as u8;
                    }
                }
                img.get_pixel_mut(x as u32, y as u32).0 = rgb;
            }
        }
        img
    }
}

/// Clamp a linear color into 24-bit. Non-finite channels become 0 so a bad
/// pixel can never poison the framebuffer.
pub fn pack_color(color: &Vec3f) -> u32 {
    let to_byte = |c: Fp| -> u32 {
        if c.is_finite() {
            (c.clamp(0.0, 1.0) * 255.0).round() as u32
        } else {
            0
        }
    };
    (to_byte(color.x) << 16) | (to_byte(color.y) << 8) | to_byte(color.z)
}

pub fn srgb_encode(channel: Fp) -> Fp {
    if channel <= 0.0031308 {
        12.92 * channel
    } else {
        1.055 * channel.powf(1.0 / 2.4) - 0.055
    }
}

/// Camera basis and view plane, fixed for a whole pass.
pub struct CameraFrame {
    origin: Vec3f,
    top_left: Vec3f,
    right: Vec3f,
    true_up: Vec3f,
    pixel_size: Fp,
}

impl CameraFrame {
    pub fn new(camera: &Camera) -> Self {
        let forward = (camera.target - camera.position)
            .try_normalize(EPS)
            .unwrap_or(-Vec3f::z());
        let right = forward
            .cross(&camera.up)
            .try_normalize(EPS)
            .unwrap_or(Vec3f::x());
        let true_up = right.cross(&forward);
        let aspect = camera.img_width as Fp / camera.img_height as Fp;
        let plane_height = 2.0 * (camera.fov.to_radians() * 0.5).tan();
        let plane_width = plane_height * aspect;
        CameraFrame {
            origin: camera.position,
            top_left: camera.position - right * (0.5 * plane_width)
                + true_up * (0.5 * plane_height)
                + forward,
            right,
            true_up,
            pixel_size: plane_width / camera.img_width as Fp,
        }
    }

    /// Primary ray through the center of pixel (x, y); y counts down from
    /// the top row.
    pub fn pixel_ray(&self, x: usize, y: usize) -> Ray {
        let center = self.top_left + self.right * (self.pixel_size * (x as Fp + 0.5))
            - self.true_up * (self.pixel_size * (y as Fp + 0.5));
        Ray {
            origin: self.origin,
            direction: (center - self.origin)
                .try_normalize(EPS)
                .unwrap_or(Vec3f::z()),
        }
    }
}

fn render_pixel(scene: &Scene, frame: &CameraFrame, image: &RenderImage, index: usize) {
    let x = index % image.width();
    let y = index / image.width();
    let ray = frame.pixel_ray(x, y);
    let (color, depth) = match ray_cast(scene, &ray, HitSide::Front) {
        Some(hit) => {
            let z = hit.z;
            (shade(scene, &ray, &hit, scene.bounce_limit()), z)
        }
        None => (scene.bg_color, BIGFLOAT),
    };
    image.put_pixel(index, color, depth);
}

/// One full render pass on the calling thread's worker pool. Pixels are
/// visited in a shuffled order handed out through a shared cursor, which
/// fills the image in progressively and evens out load across rows of
/// differing scene density. Returns once every worker has joined.
pub fn render_pass(scene: &Scene, image: &RenderImage, cancel: &AtomicBool) {
    let start = Instant::now();
    image.reset();
    let frame = CameraFrame::new(&scene.camera);
    let total = image.total_pixels();
    let mut order: Vec<usize> = (0..total).collect();
    order.shuffle(&mut Xoshiro256PlusPlus::from_entropy());
    let cursor = AtomicUsize::new(0);
    let workers = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .max(4);
    log::info!(
        "rendering {}x{} with {} workers",
        image.width(),
        image.height(),
        workers
    );
    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                let next = cursor.fetch_add(1, Ordering::Relaxed);
                if next >= total {
                    break;
                }
                render_pixel(scene, &frame, image, order[next]);
            });
        }
    });
    if cancel.load(Ordering::Relaxed) {
        log::info!(
            "render cancelled after {}/{} pixels in {:.2?}",
            image.rendered_pixels(),
            total,
            start.elapsed()
        );
    } else {
        log::info!("render finished in {:.2?}", start.elapsed());
    }
}

/// Owns the lifetime of an asynchronous render pass: `begin_render` starts a
/// supervisor thread driving the worker pool, `stop_render` requests
/// cancellation and joins, `wait` joins without cancelling.
pub struct Renderer {
    cancel: Arc<AtomicBool>,
    supervisor: Option<thread::JoinHandle<()>>,
}

impl Default for Renderer {
    fn default() -> Self {
        Renderer::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        Renderer {
            cancel: Arc::new(AtomicBool::new(false)),
            supervisor: None,
        }
    }

    pub fn is_rendering(&self) -> bool {
        self.supervisor.is_some()
    }

    /// Refused while a previous pass has not been stopped or waited out.
    pub fn begin_render(&mut self, scene: Arc<Scene>, image: Arc<RenderImage>) {
        if self.supervisor.is_some() {
            log::warn!("begin_render called while a render is in progress");
            return;
        }
        self.cancel.store(false, Ordering::Relaxed);
        let cancel = Arc::clone(&self.cancel);
        self.supervisor = Some(thread::spawn(move || {
            render_pass(&scene, &image, &cancel);
        }));
    }

    /// Request cooperative cancellation and block until every worker has
    /// joined. Safe to call when no pass is running.
    pub fn stop_render(&mut self) {
        if let Some(handle) = self.supervisor.take() {
            self.cancel.store(true, Ordering::Relaxed);
            if handle.join().is_err() {
                log::error!("render supervisor thread panicked");
            }
        }
    }

    pub fn wait(&mut self) {
        if let Some(handle) = self.supervisor.take() {
            if handle.join().is_err() {
                log::error!("render supervisor thread panicked");
            }
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.stop_render();
    }
}
