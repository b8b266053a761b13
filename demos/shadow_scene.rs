//! Animated sun over a checkered ground, a few cubes and a sphere
//!
//! The sun orbits slowly so its shadow map is re-rendered every frame; the
//! static fill light is rendered once and served from the cache afterwards.
//!
//! Run with `RUST_LOG=umbra=debug cargo run --example shadow_scene`.

use cgmath::{Deg, Matrix4, Point3, Vector3};
use umbra::gfx::geometry::{generate_cube, generate_plane, generate_sphere};
use umbra::gfx::lighting::LightDesc;
use umbra::gfx::resources::material::Material;
use umbra::gfx::scene::RenderableObject;
use umbra::prelude::{AntiAliasMode, Camera, PostProcessConfig, RenderConfig, ToneMapping};
use umbra::Viewer;

const CHECKER_SIZE: u32 = 64;

fn checker_pixels() -> Vec<u8> {
    let mut pixels = Vec::with_capacity((CHECKER_SIZE * CHECKER_SIZE * 4) as usize);
    for y in 0..CHECKER_SIZE {
        for x in 0..CHECKER_SIZE {
            let value = if (x / 8 + y / 8) % 2 == 0 { 220 } else { 90 };
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
    }
    pixels
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let camera = Camera::look_at(Point3::new(8.0, 6.0, 10.0), Point3::new(0.0, 0.5, 0.0), 1.5);
    let config = RenderConfig::default().with_post(
        PostProcessConfig::default()
            .with_anti_alias(AntiAliasMode::Msaa4xFxaa)
            .with_tone_mapping(ToneMapping::Filmic),
    );

    let mut sun_angle = 0.0f32;

    Viewer::new(camera)?
        .with_title("Umbra - shadow scene")
        .with_config(config)
        .on_setup(|device, scene| {
            let ground = scene.upload_mesh(device, "ground", &generate_plane(20.0, 20.0, 8, 8))?;
            let cube = scene.upload_mesh(device, "cube", &generate_cube())?;
            let sphere = scene.upload_mesh(device, "sphere", &generate_sphere(48, 24))?;

            let pixels = checker_pixels();
            let checker =
                scene.upload_texture(device, "checker", CHECKER_SIZE, CHECKER_SIZE, &pixels)?;
            scene.add_material(Material::new("ground", [1.0; 4]).with_texture(checker));

            scene.add_object(
                RenderableObject::textured("ground", ground.key, ground.bounding_radius, "ground")
                    .with_cast_shadows(false),
            );
            for (i, offset) in [-3.0f32, 0.0, 3.0].into_iter().enumerate() {
                let color = [[0.8, 0.2, 0.2, 1.0], [0.2, 0.8, 0.2, 1.0], [0.2, 0.3, 0.9, 1.0]][i];
                let transform = Matrix4::from_translation(Vector3::new(offset, 0.5, -1.5))
                    * Matrix4::from_angle_y(Deg(20.0 * i as f32));
                let name = format!("cube_{}", i);
                scene.add_object(
                    RenderableObject::flat(&name, cube.key, cube.bounding_radius, color)
                        .with_transform(transform),
                );
            }
            let white = [0.9, 0.9, 0.9, 1.0];
            scene.add_object(
                RenderableObject::flat("sphere", sphere.key, sphere.bounding_radius, white)
                    .with_transform(Matrix4::from_translation(Vector3::new(0.0, 1.0, 2.0))),
            );

            Ok(vec![
                LightDesc::directional(Point3::new(10.0, 15.0, 5.0), Point3::new(0.0, 0.0, 0.0))
                    .with_intensity(3.0)
                    .with_color([1.0, 0.95, 0.85]),
                LightDesc::directional(Point3::new(-8.0, 6.0, -8.0), Point3::new(0.0, 0.0, 0.0))
                    .with_intensity(0.6)
                    .with_color([0.6, 0.7, 1.0]),
            ])
        })
        .on_update(move |delta_time, _scene, _camera, renderer| {
            sun_angle += delta_time * 0.2;
            let Some(&sun) = renderer.lights().ids().first() else {
                return;
            };
            if let Some(light) = renderer.light_mut(sun) {
                light.set_position(Point3::new(
                    15.0 * sun_angle.cos(),
                    15.0,
                    15.0 * sun_angle.sin(),
                ));
            }
        })
        .run()
}
