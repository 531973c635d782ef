// Frame pipeline for pinball dot-matrix displays.
//
// Producers post frames in several encodings; a worker thread normalizes
// them (level ramps, palette synthesis, optional recolorization) and fans
// the result out to attached display backends and in-process virtual views.
//
// - frame.rs: frame model and update variants
// - palette.rs: brightness curve, level ramps, palette synthesis
// - transform.rs: pure pixel-buffer transforms
// - pipeline.rs: the Dmd object and its worker
// - backend.rs: the backend trait implemented by hardware drivers
// - virt.rs: snapshot views for in-process consumers
// - colorize.rs: colorization engine adapter

pub mod backend;
pub mod colorize;
pub mod config;
pub mod frame;
pub mod palette;
pub mod pipeline;
pub mod transform;
pub mod virt;

pub use backend::{BackendError, DisplayBackend};
pub use colorize::{Colorizer, ColorizerLoader, SegmentRenderer};
pub use config::DmdConfig;
pub use frame::{DmdUpdate, FrameError, Rgb, SegmentLayout};
pub use pipeline::Dmd;
pub use virt::{FrameSnapshot, VirtualView};
