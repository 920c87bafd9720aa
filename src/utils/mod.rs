mod id_gen;
mod toposort;

pub use id_gen::{IdGenerator, NameGenerator};
pub use toposort::toposort;
