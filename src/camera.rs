// Free-fly camera
//
// Pure kinematics: position plus pitch/yaw, driven by key state from
// the window system. The renderer only ever sees the resulting view
// matrix.

use cgmath::{Deg, InnerSpace, Matrix4, Quaternion, Rotation3, SquareMatrix, Vector3};

pub struct Camera {
    pub position: Vector3<f32>,
    pub velocity: Vector3<f32>,
    /// radians
    pub pitch: f32,
    /// radians
    pub yaw: f32,
    pub speed: f32,
}

impl Camera {
    pub fn new(position: Vector3<f32>) -> Self {
        Self {
            position: position,
            velocity: Vector3::new(0.0, 0.0, 0.0),
            pitch: 0.0,
            yaw: 0.0,
            speed: 2.5,
        }
    }

    fn rotation(&self) -> Quaternion<f32> {
        let yaw = Quaternion::from_angle_y(Deg(self.yaw.to_degrees()));
        let pitch = Quaternion::from_angle_x(Deg(self.pitch.to_degrees()));
        yaw * pitch
    }

    /// Integrate velocity in camera space.
    pub fn update(&mut self, dt: f32) {
        if self.velocity.magnitude() > 0.0 {
            let world_vel = self.rotation() * (self.velocity * self.speed * dt);
            self.position += world_vel;
        }
    }

    /// Rotate from relative mouse motion.
    pub fn process_mouse(&mut self, dx: f32, dy: f32) {
        self.yaw -= dx / 200.0;
        self.pitch -= dy / 200.0;
        // keep the horizon from flipping
        let limit = std::f32::consts::FRAC_PI_2 - 0.01;
        self.pitch = self.pitch.max(-limit).min(limit);
    }

    /// The view matrix: inverse of the camera's world transform.
    pub fn view_matrix(&self) -> Matrix4<f32> {
        let translation = Matrix4::from_translation(self.position);
        let rotation: Matrix4<f32> = self.rotation().into();
        (translation * rotation)
            .invert()
            .unwrap_or_else(Matrix4::identity)
    }
}
