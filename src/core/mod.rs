pub mod config;
pub mod constants;
pub mod events;
pub mod geo;
pub mod map;
pub mod projection;
pub mod viewport;
