//! Amount helpers.
//!
//! Amounts are `rust_decimal::Decimal` values fixed at two decimal places.
//! A posting's `remaining_balance` uses the same representation.

use rust_decimal::Decimal;

/// Decimal places carried by every stored amount.
pub const AMOUNT_SCALE: u32 = 2;

/// Check if an amount fits the stored scale without rounding.
pub fn has_valid_scale(amount: Decimal) -> bool {
    amount.normalize().scale() <= AMOUNT_SCALE
}

/// Normalise an amount to the stored scale.
///
/// Callers are expected to validate scale first; this only pads, e.g. `5`
/// becomes `5.00`, so stored and returned values compare and print alike.
pub fn to_stored_scale(amount: Decimal) -> Decimal {
    let mut value = amount.round_dp(AMOUNT_SCALE);
    value.rescale(AMOUNT_SCALE);
    value
}

/// Check if a remaining balance denotes an outstanding (unsettled) debit.
pub fn is_outstanding(remaining_balance: Decimal) -> bool {
    remaining_balance < Decimal::ZERO
}
