pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::MaestroConfig;
pub use error::{MaestroError, Result};
pub use event::EventBus;
pub use types::*;
