//! Address space planning and cyclic assignment.
//!
//! # Algorithm
//!
//! 1. Reject empty subsets. An edge rule pointing at a space with no files
//!    cannot be served.
//! 2. Pick the smallest width whose capacity covers the item count
//!    (never below `min_width`, never above `max_width`).
//! 3. Walk addresses `0..capacity` in order, assigning item
//!    `address % item_count`.
//!
//! Step 3 means every address has exactly one item and per-item counts
//! differ by at most one. Since it only depends on `item_count` and
//! `capacity`, the same corpus always produces the same layout.

use thiserror::Error;

use crate::address::{min_width_for, render_address, Radix};

/// Errors raised while planning an address space.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The subset for this space has no items.
    #[error("address space `{space}` has no items")]
    EmptySubset { space: String },

    /// Radix outside the renderable range.
    #[error("radix {0} is outside 2..=36")]
    InvalidRadix(u32),

    /// The subset needs more digits than allowed.
    #[error(
        "address space `{space}` needs width {required} for {item_count} items \
         (maximum is {max_width})"
    )]
    WidthExceeded {
        space: String,
        item_count: usize,
        required: u32,
        max_width: u32,
    },

    /// A computed plan broke coverage or minimality. Always a logic defect.
    #[error("address space `{space}` violates an invariant: {detail}")]
    Invariant { space: String, detail: String },
}

impl PlanError {
    /// Address space the error belongs to, if any.
    pub fn space(&self) -> Option<&str> {
        match self {
            PlanError::EmptySubset { space }
            | PlanError::WidthExceeded { space, .. }
            | PlanError::Invariant { space, .. } => Some(space),
            PlanError::InvalidRadix(_) => None,
        }
    }

    fn invariant(space: &str, detail: impl Into<String>) -> Self {
        PlanError::Invariant {
            space: space.to_string(),
            detail: detail.into(),
        }
    }
}

/// Bounds applied to every space planned in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub radix: Radix,
    pub min_width: u32,
    pub max_width: u32,
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            radix: Radix::HEX,
            min_width: 1,
            max_width: 6,
        }
    }
}

/// One address space: a name, a radix, and the width chosen for its items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpace {
    /// `"global"` or a category code.
    pub name: String,
    pub radix: Radix,
    pub width: u32,
    /// `radix^width`.
    pub capacity: usize,
    pub item_count: usize,
}

impl AddressSpace {
    /// Render `address` with this space's width and radix.
    pub fn render(&self, address: usize) -> String {
        render_address(address, self.width, self.radix)
    }
}

/// Total map from every address in `[0, capacity)` to an item index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    item_count: usize,
    capacity: usize,
}

impl Assignment {
    /// Item index for `address`. Panics in debug builds if out of range.
    pub fn item_at(&self, address: usize) -> usize {
        debug_assert!(address < self.capacity);
        address % self.item_count
    }

    /// `(address, item index)` pairs in address order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.capacity).map(move |addr| (addr, self.item_at(addr)))
    }

    /// How many addresses each item received, indexed by item.
    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.item_count];
        for (_, item) in self.iter() {
            counts[item] += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.capacity == 0
    }
}

/// Planned space plus its assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpacePlan {
    pub space: AddressSpace,
    pub assignment: Assignment,
}

/// Plan the address space `name` for `item_count` items.
///
/// # Errors
///
/// - [`PlanError::EmptySubset`] when `item_count == 0`.
/// - [`PlanError::WidthExceeded`] when the required width is above
///   `limits.max_width`.
/// - [`PlanError::Invariant`] if the computed capacity does not cover the
///   items or is not minimal.
pub fn plan_space(
    name: &str,
    item_count: usize,
    limits: &PlanLimits,
) -> Result<SpacePlan, PlanError> {
    if item_count == 0 {
        return Err(PlanError::EmptySubset {
            space: name.to_string(),
        });
    }

    let minimal = min_width_for(item_count, limits.radix);
    let width = minimal.max(limits.min_width.max(1));
    if width > limits.max_width {
        return Err(PlanError::WidthExceeded {
            space: name.to_string(),
            item_count,
            required: width,
            max_width: limits.max_width,
        });
    }

    let capacity = limits
        .radix
        .capacity(width)
        .ok_or_else(|| PlanError::invariant(name, format!("capacity overflow at width {width}")))?;

    if capacity < item_count {
        return Err(PlanError::invariant(
            name,
            format!("capacity {capacity} < item count {item_count}"),
        ));
    }
    if width > limits.min_width.max(1) {
        let below = limits.radix.capacity(width - 1).unwrap_or(usize::MAX);
        if below >= item_count {
            return Err(PlanError::invariant(
                name,
                format!("width {width} is not minimal for {item_count} items"),
            ));
        }
    }

    Ok(SpacePlan {
        space: AddressSpace {
            name: name.to_string(),
            radix: limits.radix,
            width,
            capacity,
            item_count,
        },
        assignment: Assignment {
            item_count,
            capacity,
        },
    })
}
