//! Normalized data schemas shared across the pipeline

pub mod item;

pub use item::{Item, RawItem, Source};
