//! gridstitch - distributed image pyramid and stitching orchestration.
//!
//! This library decomposes very large tiled 3D volumes into subtasks and
//! runs them either as local OS processes or as cluster (DRMAA) jobs. Two
//! workloads are supported: distributed multigrid gradient-domain stitching
//! (a long-lived server plus one client per image band) and a mipmap
//! retile/scale pipeline that explodes a volume into independent JVM
//! tile-generation jobs. No pixels are processed here; gridstitch is purely
//! an orchestrator for the external executables that do the imaging work.
//!
//! # Building blocks
//!
//! - [`job::Processor`] runs a [`job::Job`]: [`job::EchoProcessor`] prints
//!   it, [`job::LocalProcessor`] spawns it, [`cluster::GridProcessor`]
//!   submits it to the cluster, and [`job::ParallelProcessor`] fans it out
//!   through a [`job::Splitter`] over a bounded worker pool.
//! - [`igrid::TileGrid`] models the sparse tile-index files the stitching
//!   tools exchange.
//! - [`dmg`] and [`mipmaps`] wire those pieces into the two pipelines.

pub mod args;
pub mod cluster;
pub mod config;
pub mod dmg;
pub mod igrid;
pub mod job;
pub mod logging;
pub mod mipmaps;

/// Version of the gridstitch library and CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
