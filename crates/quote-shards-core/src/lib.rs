//! # quote-shards core
//!
//! Pure planning logic for quote-shards: how many address digits a corpus
//! partition needs, and which record each address resolves to.
//!
//! This crate does no filesystem or network I/O and has no async runtime.
//! Everything here is a deterministic function of the item count and the
//! radix, which is what lets an unchanged corpus regenerate byte-identical
//! output.
//!
//! ```rust
//! use quote_shards_core::plan::{plan_space, PlanLimits};
//!
//! let plan = plan_space("global", 10, &PlanLimits::default()).unwrap();
//! assert_eq!(plan.space.width, 1);
//! assert_eq!(plan.space.capacity, 16);
//! assert_eq!(plan.assignment.item_at(12), 2);
//! ```

pub mod address;
pub mod plan;

pub use address::{min_width_for, parse_address, render_address, Radix};
pub use plan::{plan_space, AddressSpace, Assignment, PlanError, PlanLimits, SpacePlan};
