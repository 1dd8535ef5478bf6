mod client;
mod device;
mod error;
mod logger;
mod protocol;
mod session;
mod types;

pub use client::{MelView, MelViewBuilder};
pub use device::{Device, STATE_LEASE};
pub use error::{Error, Result};
pub use types::*;
