use crate::constants::BASE_RANGE_SPAN;
use crate::error::{Error, Result};

/// Closed interval of concrete identifiers sharing one base.
///
/// An identifier has 14 digits: an 8-digit base then a 6-digit order and
/// check suffix, so base `b` covers `[b * 10^6, b * 10^6 + 999_999]`. The
/// interval is never clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseRange {
    pub min: i64,
    pub max: i64,
}

impl BaseRange {
    /// Range of the base given as decimal text
    pub fn for_base(base: &str) -> Result<Self> {
        let n: i64 = base
            .parse()
            .map_err(|e| Error::invalid_input(base, format!("base cnpj is not an integer: {}", e)))?;
        if n < 0 {
            return Err(Error::invalid_input(base, "base cnpj cannot be negative"));
        }
        // adds 6 zeroes to complete the 14 digits
        let min = n
            .checked_mul(BASE_RANGE_SPAN)
            .ok_or_else(|| Error::invalid_input(base, "base cnpj is out of range"))?;
        Ok(BaseRange {
            min,
            max: min + (BASE_RANGE_SPAN - 1),
        })
    }

    /// Number of identifiers in the range
    pub fn len(&self) -> i64 {
        self.max - self.min + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, id: i64) -> bool {
        self.min <= id && id <= self.max
    }
}

/// Minimum and maximum identifiers possible given a base
pub fn range_for(base: &str) -> Result<(i64, i64)> {
    let range = BaseRange::for_base(base)?;
    Ok((range.min, range.max))
}

/// Base of a concrete identifier
pub fn base_of(id: i64) -> i64 {
    id / BASE_RANGE_SPAN
}
