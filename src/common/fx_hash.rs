//! Hash map/set aliases used throughout the compiler.
//!
//! Internal tables key on small values: names, statement indices, block
//! references. FxHash is unseeded, so iteration order is stable across runs
//! for identical inputs.

pub use rustc_hash::{FxHashMap, FxHashSet};
