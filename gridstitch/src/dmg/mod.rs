//! Distributed multigrid gradient-domain (DMG) stitching orchestration.
//!
//! A DMG run pairs one long-lived *server* process with one client per
//! image band; every client must connect to the single server. The modules
//! here extract and validate the DMG argument set, build the server/client
//! command lines, perform the server-address rendezvous, fan clients out in
//! parallel, and prepare/finalize whole-section runs by cropping the section
//! grid into vertical bands and stitching the per-band results back
//! together.

mod attrs;
mod command;
mod image;
mod section;

pub use attrs::DmgAttrs;
pub use command::{ClientCommand, SectionCommand, ServerCommand};
pub use image::{parse_server_address, BandSplitter, BandsProcessor};
pub use section::{CoordInfo, SectionHelper, SectionProcessor};
