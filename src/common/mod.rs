pub mod bitset;   // Compact u64-word bitset for dataflow states
pub mod error;    // CompileError for the driver seam
pub mod fx_hash;  // FxHashMap/FxHashSet re-exports
