mod deployment;
mod generic;
mod image_stream;
mod pdb;
mod secret;

pub use deployment::*;
pub use generic::*;
pub use image_stream::*;
pub use pdb::*;
pub use secret::*;
