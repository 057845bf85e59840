mod context;
mod experiment;
mod interaction;
mod item;
mod recommendation;

pub use context::*;
pub use experiment::*;
pub use interaction::*;
pub use item::*;
pub use recommendation::*;

#[cfg(test)]
pub(crate) use item::fixtures;
