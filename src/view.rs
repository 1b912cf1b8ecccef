use crate::error::Error;
use nalgebra::{Rotation3, Vector3};
use uom::si::{
    angle::{degree, radian},
    f64::Angle,
};

/// A virtual pinhole camera pointed at a fixed direction of the panorama.
///
/// Yaw is measured about the vertical axis and is positive to the right.
/// Pitch is measured about the lateral axis and is positive upwards.
#[derive(Clone, Debug, PartialEq)]
pub struct View {
    name: String,
    pitch: Angle,
    yaw: Angle,
}

impl View {
    /// Creates a new `View`.
    ///
    /// `yaw` is wrapped into (-180, 180]. Returns an error if `pitch` is not
    /// within [-90, 90] or either angle is not finite.
    pub fn new(name: impl Into<String>, pitch: Angle, yaw: Angle) -> Result<Self, Error> {
        let name = name.into();
        let pitch_deg = pitch.get::<degree>();
        let yaw_deg = yaw.get::<degree>();

        if !pitch_deg.is_finite() || !yaw_deg.is_finite() || !(-90.0..=90.0).contains(&pitch_deg)
        {
            return Err(Error::InvalidViewAngle {
                name,
                pitch_deg,
                yaw_deg,
            });
        }

        Ok(Self {
            name,
            pitch,
            yaw: Angle::new::<degree>(wrap_degrees(yaw_deg)),
        })
    }

    /// Creates a new `View` from angles in degrees.
    pub fn from_degrees(
        name: impl Into<String>,
        pitch_deg: f64,
        yaw_deg: f64,
    ) -> Result<Self, Error> {
        Self::new(
            name,
            Angle::new::<degree>(pitch_deg),
            Angle::new::<degree>(yaw_deg),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pitch(&self) -> Angle {
        self.pitch
    }

    pub fn yaw(&self) -> Angle {
        self.yaw
    }

    /// Returns the rotation taking vectors from the view's camera frame into
    /// the panoramic (world) frame.
    ///
    /// Both frames are x right, y down, z forward. The rotation is a yaw about
    /// the vertical axis followed by a pitch about the resulting lateral axis.
    /// The rig extrinsics rely on this exact order.
    pub fn orientation(&self) -> Rotation3<f64> {
        // Positive pitch tilts +z towards -y, which is up.
        Rotation3::from_axis_angle(&Vector3::y_axis(), self.yaw.get::<radian>())
            * Rotation3::from_axis_angle(&Vector3::x_axis(), self.pitch.get::<radian>())
    }
}

/// Wraps an angle in degrees into (-180, 180].
fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = (angle + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 { 180.0 } else { wrapped }
}

/// An ordered set of uniquely named views.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ViewCatalog {
    views: Vec<View>,
}

impl ViewCatalog {
    /// Creates a catalog preserving the order of `views`.
    ///
    /// Returns an error if two views share a name.
    pub fn new(views: Vec<View>) -> Result<Self, Error> {
        for (i, view) in views.iter().enumerate() {
            if views[..i].iter().any(|other| other.name == view.name) {
                return Err(Error::DuplicateView {
                    name: view.name.clone(),
                });
            }
        }

        Ok(Self { views })
    }

    /// Creates a ring layout of `yaw_steps` evenly spaced yaws, once at
    /// `+base_pitch` and once at `-base_pitch`.
    ///
    /// Views are named `pitch_{pitch}_yaw_{yaw}` with one decimal. A zero base
    /// pitch produces a single ring.
    pub fn ring(base_pitch: Angle, yaw_steps: usize, yaw_offset: Angle) -> Result<Self, Error> {
        if yaw_steps == 0 {
            return Ok(Self::default());
        }

        let base_pitch_deg = base_pitch.get::<degree>();
        let offset_deg = yaw_offset.get::<degree>();
        let step_deg = 360.0 / yaw_steps as f64;

        let pitches: Vec<f64> = match base_pitch_deg == 0.0 {
            true => vec![0.0],
            false => vec![base_pitch_deg, -base_pitch_deg],
        };

        let views = pitches
            .into_iter()
            .flat_map(|pitch| {
                (0..yaw_steps).map(move |i| {
                    let yaw = wrap_degrees(i as f64 * step_deg + offset_deg);
                    View::from_degrees(format!("pitch_{pitch:.1}_yaw_{yaw:.1}"), pitch, yaw)
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(views)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn views(&self) -> &[View] {
        &self.views
    }

    pub fn first(&self) -> Option<&View> {
        self.views.first()
    }

    pub fn get(&self, name: &str) -> Option<&View> {
        self.views.iter().find(|view| view.name == name)
    }

    /// Returns the position of the view called `name` in catalog order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.views.iter().position(|view| view.name == name)
    }
}
