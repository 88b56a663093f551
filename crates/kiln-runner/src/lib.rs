//! Kiln Runner
//!
//! Runs build containers through the Docker Engine API.

pub mod docker;

pub use docker::{DockerEnvironment, container_env};
pub use kiln_core::REDUNDANT_BUILD_EXIT_CODE;
