//! Progressive segment feeding into a playback pipeline, with the license exchange needed to
//! decrypt what is being fed.
//!
//! Two pumps share one [`pipeline::PlaybackPipeline`]:
//!
//! - the [`feeder::SegmentFeeder`] fetches and appends one segment each time the pipeline asks
//!   for more data, then signals end of stream;
//! - the [`drm::DrmCoordinator`] negotiates a key system once, binds its key container to the
//!   pipeline and runs one license exchange per encrypted content notification.
//!
//! [`player::Player`] wires both pumps to the pipeline's notifications.

pub mod clearkey;
pub mod config;
pub mod drm;
mod encoding;
pub mod error;
pub mod feeder;
pub mod fetch;
pub mod key_system;
pub mod license;
pub mod mp4;
pub mod pipeline;
pub mod player;
pub mod queue;
pub mod util;

pub use error::{EmeError, EmeResult, FetchError};
pub use util::http::HttpClient;
