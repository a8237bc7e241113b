pub mod curve;
pub mod history;
pub mod id;
pub mod layers;
pub mod repository;
pub mod texture;
pub mod touch;

pub use id::{RuntimeId, TextureId};
