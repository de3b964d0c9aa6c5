pub mod io;
pub mod plane;
pub mod volume;

pub use self::plane::{Mask, Plane};
pub use self::volume::{Geometry, Volume, VolumeMask};
