pub mod engine;

pub use engine::StorageEngine;
