// stratus - demo application for the squall renderer
//
// Opens an SDL window, loads one of the built in demo scenes, and
// runs the render loop until Escape or the window closes. The scene
// to show is picked by a single optional positional index.

mod camera;
mod demo;

use anyhow::Result;

fn main() -> Result<()> {
    env_logger::init();

    let scene_index: usize = std::env::args()
        .nth(1)
        .map(|arg| arg.parse())
        .transpose()?
        .unwrap_or(0)
        .min(demo::scene_count() - 1);

    run(scene_index)
}

#[cfg(not(feature = "sdl"))]
fn run(_scene_index: usize) -> Result<()> {
    anyhow::bail!("stratus was built without a window backend; rebuild with --features sdl");
}

#[cfg(feature = "sdl")]
fn run(scene_index: usize) -> Result<()> {
    use cgmath::{Deg, Matrix4, Vector3};
    use sdl2::event::{Event, WindowEvent};
    use sdl2::keyboard::Keycode;
    use squall::{CameraInfo, CreateInfo, SdlWindowSystem, Squall};

    let sdl = sdl2::init().map_err(anyhow::Error::msg)?;
    let video = sdl.video().map_err(anyhow::Error::msg)?;
    let window = video
        .window("stratus", 1700, 900)
        .vulkan()
        .resizable()
        .position_centered()
        .build()?;

    let info = CreateInfo::builder().app_name("stratus").build();
    let mut engine = Squall::new(&info, &SdlWindowSystem::new(&window))?;

    log::info!("loading demo scene {}", scene_index);
    let data = demo::build_scene(scene_index);
    let mut scene = engine.load_scene(&data)?;

    let mut cam = camera::Camera::new(Vector3::new(0.0, 0.0, 5.0));
    let mut event_pump = sdl.event_pump().map_err(anyhow::Error::msg)?;
    let mut last_frame = std::time::Instant::now();
    let mut spin = true;
    let mut effect = 0usize;

    'running: loop {
        for event in event_pump.poll_iter() {
            match event {
                Event::Quit { .. } => break 'running,
                Event::KeyDown {
                    keycode: Some(key), ..
                } => match key {
                    Keycode::Escape => break 'running,
                    Keycode::W => cam.velocity.z = -1.0,
                    Keycode::S => cam.velocity.z = 1.0,
                    Keycode::A => cam.velocity.x = -1.0,
                    Keycode::D => cam.velocity.x = 1.0,
                    Keycode::Space => spin = !spin,
                    Keycode::E => {
                        effect = (effect + 1) % engine.background_effect_count();
                        engine.set_background_effect(effect);
                    }
                    _ => {}
                },
                Event::KeyUp {
                    keycode: Some(key), ..
                } => match key {
                    Keycode::W | Keycode::S => cam.velocity.z = 0.0,
                    Keycode::A | Keycode::D => cam.velocity.x = 0.0,
                    _ => {}
                },
                Event::MouseMotion { xrel, yrel, .. } => {
                    cam.process_mouse(xrel as f32, yrel as f32);
                }
                Event::Window { win_event, .. } => match win_event {
                    WindowEvent::Resized(..) | WindowEvent::SizeChanged(..) => {
                        engine.request_resize(window.vulkan_drawable_size());
                    }
                    WindowEvent::Minimized => {
                        engine.request_resize((0, 0));
                    }
                    WindowEvent::Restored => {
                        engine.request_resize(window.vulkan_drawable_size());
                    }
                    _ => {}
                },
                _ => {}
            }
        }

        let now = std::time::Instant::now();
        let dt = now.duration_since(last_frame).as_secs_f32();
        last_frame = now;

        cam.update(dt);
        if spin {
            scene.rotate_top_nodes(Matrix4::from_angle_y(Deg(12.0 * dt)));
        }

        let camera_info = CameraInfo {
            view: cam.view_matrix(),
            fov_y: 70.0,
            near: 0.1,
            far: 10000.0,
        };

        engine.draw_frame(&mut scene, &camera_info, None)?;
    }

    Ok(())
}
