//! Camera view points and projections.
//!
//! A [`Camera`] is a [`ViewPoint`] (where it stands and where it looks) plus a
//! [`Projection`]. The projection is a closed set of kinds; everything the kinds
//! share (aspect ratio, clip planes, view point) lives on the camera itself.

use cgmath::{Deg, InnerSpace, Matrix4, Point3, Rad, Vector3};

use crate::{
    data_structures::bounding_box::BoundingBox,
    error::{EngineError, Result},
};

/// Maps OpenGL style clip space (z in -1..1) to the 0..1 depth range used by
/// Direct3D, Vulkan, Metal and WebGPU.
#[rustfmt::skip]
pub const CLIP_SPACE_CORRECTION: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

const SAFE_FRAC_PI_2: f32 = std::f32::consts::FRAC_PI_2 - 0.0001;

/// Position and orientation of a camera.
///
/// Yaw turns around the y axis (head left/right), pitch around the camera's x
/// axis (head up/down). Pitch is kept just short of straight up or down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewPoint {
    pub position: Point3<f32>,
    pub yaw: Rad<f32>,
    pub pitch: Rad<f32>,
}

impl ViewPoint {
    pub fn new<V: Into<Point3<f32>>, Y: Into<Rad<f32>>, P: Into<Rad<f32>>>(
        position: V,
        yaw: Y,
        pitch: P,
    ) -> Self {
        let pitch = pitch.into();
        Self {
            position: position.into(),
            yaw: yaw.into(),
            pitch: Rad(pitch.0.clamp(-SAFE_FRAC_PI_2, SAFE_FRAC_PI_2)),
        }
    }

    /// Unit vector the view point looks along.
    pub fn forward(&self) -> Vector3<f32> {
        let (sin_pitch, cos_pitch) = self.pitch.0.sin_cos();
        let (sin_yaw, cos_yaw) = self.yaw.0.sin_cos();
        Vector3::new(cos_pitch * cos_yaw, sin_pitch, cos_pitch * sin_yaw).normalize()
    }

    pub fn view_matrix(&self) -> Matrix4<f32> {
        Matrix4::look_to_rh(self.position, self.forward(), Vector3::unit_y())
    }
}

impl Default for ViewPoint {
    fn default() -> Self {
        // right/left, height, forward/backward - looking down onto the origin
        Self::new((0.0, 30.0, 20.0), Deg(-90.0), Deg(-60.0))
    }
}

/// The kind-specific part of a camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// Vertical field of view.
    Perspective { fovy: Rad<f32> },
    /// Height of the visible area in world units.
    Orthographic { height: f32 },
}

impl Projection {
    pub fn perspective<F: Into<Rad<f32>>>(fovy: F) -> Result<Self> {
        let projection = Self::Perspective { fovy: fovy.into() };
        projection.validate()?;
        Ok(projection)
    }

    pub fn orthographic(height: f32) -> Result<Self> {
        let projection = Self::Orthographic { height };
        projection.validate()?;
        Ok(projection)
    }

    /// Checks a projection built from its variants directly.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Perspective { fovy } if !(fovy.0 > 0.0 && fovy.0 < std::f32::consts::PI) => {
                Err(EngineError::invalid(
                    "fovy",
                    format!("field of view must lie in (0, pi), got {}", fovy.0),
                ))
            }
            Self::Orthographic { height } if !(height > 0.0 && height.is_finite()) => {
                Err(EngineError::invalid(
                    "height",
                    format!("orthographic height must be positive, got {}", height),
                ))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    view: ViewPoint,
    projection: Projection,
    aspect: f32,
    znear: f32,
    zfar: f32,
}

impl Camera {
    pub fn new(
        view: ViewPoint,
        projection: Projection,
        aspect: f32,
        znear: f32,
        zfar: f32,
    ) -> Result<Self> {
        check_aspect(aspect)?;
        projection.validate()?;
        if !(znear > 0.0 && znear < zfar && zfar.is_finite()) {
            return Err(EngineError::invalid(
                "znear",
                format!("clip planes need 0 < znear < zfar, got {}..{}", znear, zfar),
            ));
        }
        Ok(Self {
            view,
            projection,
            aspect,
            znear,
            zfar,
        })
    }

    pub fn perspective<F: Into<Rad<f32>>>(
        view: ViewPoint,
        fovy: F,
        aspect: f32,
        znear: f32,
        zfar: f32,
    ) -> Result<Self> {
        Self::new(view, Projection::perspective(fovy)?, aspect, znear, zfar)
    }

    pub fn orthographic(
        view: ViewPoint,
        height: f32,
        aspect: f32,
        znear: f32,
        zfar: f32,
    ) -> Result<Self> {
        Self::new(view, Projection::orthographic(height)?, aspect, znear, zfar)
    }

    pub fn view_point(&self) -> ViewPoint {
        self.view
    }

    pub fn set_view_point(&mut self, view: ViewPoint) {
        self.view = view;
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    /// Replaces the projection; an invalid one leaves the camera untouched.
    pub fn set_projection(&mut self, projection: Projection) -> Result<()> {
        projection.validate()?;
        self.projection = projection;
        Ok(())
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn clip_planes(&self) -> (f32, f32) {
        (self.znear, self.zfar)
    }

    /// Adapts the aspect ratio to a new surface size.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(EngineError::invalid(
                "size",
                format!("surface must not be empty, got {}x{}", width, height),
            ));
        }
        self.aspect = width as f32 / height as f32;
        Ok(())
    }

    pub fn projection_matrix(&self) -> Matrix4<f32> {
        let projection = match self.projection {
            Projection::Perspective { fovy } => {
                cgmath::perspective(fovy, self.aspect, self.znear, self.zfar)
            }
            Projection::Orthographic { height } => {
                let half_h = height * 0.5;
                let half_w = half_h * self.aspect;
                cgmath::ortho(-half_w, half_w, -half_h, half_h, self.znear, self.zfar)
            }
        };
        CLIP_SPACE_CORRECTION * projection
    }

    pub fn view_projection(&self) -> Matrix4<f32> {
        self.projection_matrix() * self.view.view_matrix()
    }

    /// Moves the camera back along its viewing direction until `bounds` fits the view.
    ///
    /// Orthographic cameras additionally adapt their height to the box. The box
    /// never reaches closer than the near plane.
    pub fn frame_bounds(&mut self, bounds: &BoundingBox) {
        let radius = bounds.radius().max(f32::EPSILON);
        let center = bounds.center();
        let forward = self.view.forward();
        let distance = match self.projection {
            Projection::Perspective { fovy } => {
                let half_vertical = fovy.0 * 0.5;
                let half_horizontal = (half_vertical.tan() * self.aspect).atan();
                // the near plane must stay in front of the box
                (radius / half_vertical.min(half_horizontal).sin()).max(radius + self.znear)
            }
            Projection::Orthographic { .. } => {
                // narrow surfaces are bounded by their width
                self.projection = Projection::Orthographic {
                    height: radius * 2.0 / self.aspect.min(1.0),
                };
                radius + self.znear
            }
        };
        self.view.position = center - forward * distance;
        if distance + radius > self.zfar {
            self.zfar = distance + radius;
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            view: ViewPoint::default(),
            projection: Projection::Perspective {
                fovy: Deg(45.0).into(),
            },
            aspect: 16.0 / 9.0,
            znear: 0.1,
            zfar: 500.0,
        }
    }
}

fn check_aspect(aspect: f32) -> Result<()> {
    if aspect > 0.0 && aspect.is_finite() {
        Ok(())
    } else {
        Err(EngineError::invalid(
            "aspect",
            format!("aspect ratio must be positive, got {}", aspect),
        ))
    }
}
