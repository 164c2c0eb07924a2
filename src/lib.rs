pub mod config;
pub mod domain;
pub mod infra;

pub use domain::{Launcher, UpOptions};
