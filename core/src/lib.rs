pub mod config;
pub mod db;
pub mod error;
pub mod game;
pub mod message;
pub mod rating;
pub mod stats;

pub use error::{Error, Result};
