//! Decimal scales and rounding rules for monetary and quantity values.
//!
//! Every multiply/add that touches money or quantity goes through these
//! helpers. Round-half-up at a fixed scale, never binary floating point.

use rust_decimal::{Decimal, RoundingStrategy};

/// Fractional digits for fiat amounts (balances, prices, trade totals).
pub const MONEY_SCALE: u32 = 4;

/// Fractional digits for crypto quantities.
pub const QUANTITY_SCALE: u32 = 8;

/// Fractional digits for portfolio display values.
pub const DISPLAY_SCALE: u32 = 2;

/// Round a fiat amount to `MONEY_SCALE`, half-up.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a crypto quantity to `QUANTITY_SCALE`, half-up.
pub fn round_quantity(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(QUANTITY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a portfolio display value to `DISPLAY_SCALE`, half-up.
pub fn round_display(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DISPLAY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Total value of a trade: quantity x unit price at `MONEY_SCALE`.
///
/// Computed exactly once at execution time; the result is what gets stored
/// in the ledger entry and applied to the wallet balance, so the two can
/// never drift apart.
pub fn trade_value(quantity: Decimal, unit_price: Decimal) -> Decimal {
    round_money(quantity * unit_price)
}
