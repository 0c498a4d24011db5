pub mod api;
pub mod bundler;
pub mod config;
pub mod deploy;
pub mod error;
pub mod fs;
pub mod functions;
pub mod slug;
pub mod toolchain;

pub use error::{DeployError, DeployResult};
