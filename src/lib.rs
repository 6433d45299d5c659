#![recursion_limit = "256"]

pub mod boxes;
pub mod codecs;
pub mod commands;
pub mod config;
pub mod data;
pub mod error;
pub mod keypoints;
pub mod losses;
pub mod models;
pub mod tensor_ops;

pub use error::{PoseError, Result};
