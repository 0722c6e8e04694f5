pub mod config;
pub mod dev_mode;
pub mod error;
pub mod paths;

pub use config::Config;
pub use dev_mode::DevMode;
pub use error::{CaptureError, ErrorKind, Result};
pub use paths::{system_config_file, system_data_dir, system_enrollment_dir};
