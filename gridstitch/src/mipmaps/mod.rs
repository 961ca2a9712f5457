//! Mipmap retile/scale orchestration.
//!
//! The mipmap pipeline explodes a 3D volume into many independent JVM
//! tile-generation jobs: `retile` produces scale level 0 of a projection,
//! `scale` derives the remaining pyramid levels, and the orthoview
//! operations run the same pipeline over the XZ and ZY projections.

mod attrs;
mod command;
mod dvid;
mod split;

pub use attrs::{MipmapAttrs, Orientation, Volume};
pub use command::{RetileCommand, ScaleCommand, ServiceCommand};
pub use dvid::DvidUrlMap;
pub use split::{OrthoviewsSplitter, RetileSplitter, ScaleSplitter};
