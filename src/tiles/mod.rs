pub mod cache;
pub mod image;
pub mod loader;
pub mod matrix;
pub mod source;
