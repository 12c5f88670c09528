//! Unit-suffixed magnitudes (`1M2k`, `1h30m`, `-10s`)
//!
//! A value is a sequence of segments, each an optionally negative decimal
//! literal followed by at most one suffix character. Segments are scaled and
//! summed.

use crate::domain::OptionError;

/// Binary byte sizes
pub const SIZE_UNITS: &[(char, i64)] = &[('k', 1 << 10), ('M', 1 << 20), ('G', 1 << 30)];

/// Calendar durations in seconds
pub const DURATION_UNITS: &[(char, i64)] = &[('s', 1), ('m', 60), ('h', 3600), ('d', 86_400)];

/// Parse a unit-suffixed magnitude against the given suffix table.
///
/// A trailing literal without suffix is taken as-is (scale 1). An empty
/// string is zero.
///
/// # Errors
/// Returns [`OptionError::UnknownUnit`] for a suffix outside `units`, or
/// [`OptionError::OutOfRange`] if the sum overflows `i64`.
pub fn parse_magnitude(text: &str, units: &[(char, i64)]) -> Result<i64, OptionError> {
    let overflow = || OptionError::OutOfRange { value: text.to_string() };
    let mut chars = text.chars().peekable();
    let mut total: i64 = 0;

    while chars.peek().is_some() {
        let negative = chars.next_if_eq(&'-').is_some();
        let mut part: i64 = 0;

        while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
            part = part
                .checked_mul(10)
                .and_then(|p| p.checked_add(i64::from(digit)))
                .ok_or_else(overflow)?;
            chars.next();
        }

        let scale = match chars.next() {
            None => 1,
            Some(unit) => units
                .iter()
                .find(|(suffix, _)| *suffix == unit)
                .map(|(_, scale)| *scale)
                .ok_or(OptionError::UnknownUnit { unit })?,
        };

        let segment = part.checked_mul(scale).ok_or_else(overflow)?;
        let segment = if negative { -segment } else { segment };
        total = total.checked_add(segment).ok_or_else(overflow)?;
    }

    Ok(total)
}
