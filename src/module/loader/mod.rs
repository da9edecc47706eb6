//! Module image loading
//!
//! Defines the image loader contract and the registration-based loader shipped
//! with the crate.

pub mod loader;
pub mod registered;

pub use loader::{CodeImage, ImageLoader, ImageSource};
pub use registered::{EntryPoint, ImageRegistration, RegisteredImage, RegisteredImageLoader};
