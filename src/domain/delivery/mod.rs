pub mod commands;
pub mod errors;
pub mod manager;
pub mod value_objects;

pub use commands::*;
pub use errors::*;
pub use manager::*;
pub use value_objects::*;
