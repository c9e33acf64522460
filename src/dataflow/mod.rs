//! Dataflow Module
//!
//! Turns a workflow's step list into scheduled units and resolves the values
//! flowing between them.
//!
//! # Components
//!
//! - [`promise`]: single-assignment references to workflow inputs and unit outputs
//! - [`indirect`]: deferred port values and their resolution
//! - [`source`]: link-merge, pick-value and skipped-value filtering
//! - [`conditional`]: per-step `when` gates
//! - [`scatter`]: scatter expansion and gather extraction
//! - [`unroll`]: the fixpoint loop materializing steps into units

pub mod conditional;
pub mod indirect;
pub mod promise;
pub mod scatter;
pub mod source;
pub mod unroll;

pub use conditional::Conditional;
pub use indirect::{resolve_indirect, IndirectMap, IndirectValue, Resolver};
pub use promise::{Promise, PromiseTable};
pub use scatter::{Fanout, ScatterMethod};
pub use source::{LinkMerge, PickValue, ResolveSource};
pub use unroll::unroll;
