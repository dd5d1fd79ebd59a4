// lib.rs
// 启动器模块入口，声明并导出各子模块。
pub mod command_builder;
pub mod config;
pub mod data_preparator;
pub mod docs;
pub mod env_setup;
pub mod error;
pub mod launcher;
pub mod port;
pub mod template;
pub mod types;

pub use config::{EnvironmentVariables, LaunchConfig};
pub use error::{Error, Result};
pub use launcher::{JobLauncher, LaunchOutcome, LaunchPlan};
pub use types::LaunchVariant;
