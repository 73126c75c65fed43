pub mod packer;

pub use packer::{ContextPacker, PackTrace, PackedContext, PackingConfig};
