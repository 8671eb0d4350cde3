pub mod canonical;
pub mod config;
pub mod error;
pub mod progress;
pub mod types;

pub use canonical::*;
pub use config::Config;
pub use error::TidepoolError;
pub use progress::ProgressEvent;
pub use types::*;
