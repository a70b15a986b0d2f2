pub mod config;
pub mod cube;
pub mod messages;
pub mod motion;
pub mod patterns;
pub mod runner;
pub mod trigger;
