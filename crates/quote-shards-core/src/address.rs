//! Fixed-width address arithmetic.
//!
//! An address space of `width` digits in radix `r` holds `r^width`
//! addresses. Addresses are rendered as zero-padded lowercase strings so
//! that the edge rule's `substring(id, 0, width)` lands exactly on a file
//! name.

use crate::plan::PlanError;

/// Radix used to render addresses. Always in `2..=36`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Radix(u32);

impl Radix {
    /// Hexadecimal, matching the digits of a UUID.
    pub const HEX: Radix = Radix(16);

    pub fn new(radix: u32) -> Result<Self, PlanError> {
        if (2..=36).contains(&radix) {
            Ok(Radix(radix))
        } else {
            Err(PlanError::InvalidRadix(radix))
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Number of addresses representable with `width` digits, or `None` if
    /// it does not fit in `usize`.
    pub fn capacity(self, width: u32) -> Option<usize> {
        (self.0 as usize).checked_pow(width)
    }
}

impl Default for Radix {
    fn default() -> Self {
        Radix::HEX
    }
}

/// Smallest `width >= 1` such that `radix^width >= item_count`.
///
/// Uses integer arithmetic only, so there is no rounding at exact powers
/// (`16` items in radix 16 is width 1, `17` is width 2). An `item_count` of
/// zero or one yields width 1.
pub fn min_width_for(item_count: usize, radix: Radix) -> u32 {
    let r = radix.get() as u128;
    let n = item_count as u128;
    let mut width = 1u32;
    let mut capacity = r;
    while capacity < n {
        capacity *= r;
        width += 1;
    }
    width
}

/// Render `address` as a `width`-digit, zero-padded, lowercase string.
///
/// The caller guarantees `address < radix^width`.
pub fn render_address(address: usize, width: u32, radix: Radix) -> String {
    let r = radix.get() as usize;
    let mut digits = vec!['0'; width as usize];
    let mut rest = address;
    for slot in digits.iter_mut().rev() {
        // from_digit never fails for d < radix <= 36
        *slot = char::from_digit((rest % r) as u32, radix.get()).unwrap_or('0');
        rest /= r;
    }
    digits.into_iter().collect()
}

/// Parse a rendered address back into its numeric value.
///
/// Returns `None` unless `s` is exactly `width` valid lowercase digits.
pub fn parse_address(s: &str, width: u32, radix: Radix) -> Option<usize> {
    let valid = s
        .chars()
        .all(|c| c.is_digit(radix.get()) && !c.is_ascii_uppercase());
    if s.len() != width as usize || !valid {
        return None;
    }
    usize::from_str_radix(s, radix.get()).ok()
}
