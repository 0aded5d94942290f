pub mod config;
pub mod content;
pub mod dispatch;
pub mod dump;
pub mod error;
pub mod listing;
pub mod raw;
pub mod server;
pub mod storage;

pub use config::ServerConfig;
pub use dispatch::{Dispatcher, Reply, Request};
pub use dump::{dump_image, DumpProgress, DumpReport};
pub use error::{RecoveryError, Result};
pub use raw::{RawImageHeader, RawImageStreamer, StreamSummary, DAMAGED_SECTOR};
pub use server::{router, serve, serve_on};
pub use storage::{ImageDevice, Medium, MountedVolume, SectorDevice, Volume};
