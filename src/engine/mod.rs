pub mod assignment;
pub mod config;
pub mod model;
pub mod progression;
pub mod round;
pub mod scoring;
pub mod votes;
