pub mod spline;
pub mod tensor_extensions;

pub use spline::*;
pub use tensor_extensions::*;
