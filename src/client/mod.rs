pub mod aggregate;
pub mod submit;
