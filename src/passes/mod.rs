//! Dataflow analyses and the optimizations built on them.
//!
//! Everything here consumes the per-method CFGs and the program-wide
//! reaching-definitions facts from `reaching_defs`. Constant propagation
//! rewrites operands in place; loop-invariant detection is analysis only.
//! Neither recomputes the dataflow facts it was handed: constant
//! propagation never touches destination slots, so definition sites stay
//! valid across the whole pipeline.

pub mod constant_prop; // rewrite uses whose reaching definitions agree on one constant
pub mod loop_invariants; // flag statements computable outside their loops
pub mod reaching_defs; // iterative bit-vector reaching definitions

pub use constant_prop::propagate_constants;
pub use loop_invariants::LoopInvariants;
pub use reaching_defs::{BlockDataFlowState, DefId, ReachingDefs};
