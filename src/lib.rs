#![allow(clippy::excessive_precision)]
#![allow(missing_docs)]

pub mod appearance;
pub mod backend;
pub mod camera;
pub mod compose;
pub mod error;
pub mod field;
pub mod function;
pub mod pipeline;
pub mod render;
