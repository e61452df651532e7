use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::cmp::Ordering;

use super::TokenEntry;
use crate::types::to_token_amount;

pub const LOW_VALUE_THRESHOLD_USD: Decimal = dec!(0.10);

/// Caller-selected view over a token snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenViewOptions {
    pub show_zero_balance: bool,
    pub show_low_value: bool,
    pub low_value_threshold: Decimal,
}

impl Default for TokenViewOptions {
    fn default() -> Self {
        Self {
            show_zero_balance: true,
            show_low_value: true,
            low_value_threshold: LOW_VALUE_THRESHOLD_USD,
        }
    }
}

/// Holding value in USD: whole-token balance times price. Saturates instead
/// of overflowing.
pub fn usd_value(token: &TokenEntry) -> Decimal {
    let amount = to_token_amount(&token.balance, token.decimals);
    amount.checked_mul(token.price_usd).unwrap_or(Decimal::MAX)
}

fn has_balance(token: &TokenEntry) -> bool {
    !to_token_amount(&token.balance, token.decimals).is_zero()
}

fn is_low_value(token: &TokenEntry, threshold: Decimal) -> bool {
    // An unpriced token is not known to be worthless.
    if token.price_usd.is_zero() && has_balance(token) {
        return false;
    }
    usd_value(token) < threshold
}

/// Filters and sorts a snapshot: USD value descending, then symbol
/// ascending ignoring case.
pub fn apply_view(tokens: &[TokenEntry], options: &TokenViewOptions) -> Vec<TokenEntry> {
    let mut visible: Vec<(Decimal, &TokenEntry)> = tokens
        .iter()
        .filter(|token| options.show_zero_balance || has_balance(token))
        .filter(|token| options.show_low_value || !is_low_value(token, options.low_value_threshold))
        .map(|token| (usd_value(token), token))
        .collect();

    visible.sort_by(|(value_a, a), (value_b, b)| match value_b.cmp(value_a) {
        Ordering::Equal => a.symbol.to_lowercase().cmp(&b.symbol.to_lowercase()),
        other => other,
    });

    visible.into_iter().map(|(_, token)| token.clone()).collect()
}

pub fn total_value_usd(tokens: &[TokenEntry]) -> Decimal {
    tokens
        .iter()
        .map(usd_value)
        .fold(Decimal::ZERO, |acc, value| acc.checked_add(value).unwrap_or(Decimal::MAX))
}
