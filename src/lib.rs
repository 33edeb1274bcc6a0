#![doc = include_str!("../README.md")]
pub mod configuration;
pub mod connection;
pub mod direction;
pub mod error;
pub mod link;
pub mod logging;
pub mod platform;
pub mod protocol;
pub mod remote;
pub mod spiral;
