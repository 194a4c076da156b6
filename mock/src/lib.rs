mod hasher;

pub use hasher::{Hash128, Hasher128};
