use alloy_primitives::Address;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Pseudo-address standing in for a chain's native currency.
pub const NATIVE_TOKEN_ADDRESS: &str = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";

// rust_decimal carries at most 28 significant digits
const MAX_DECIMAL_DIGITS: usize = 28;

/// Lowercases and trims an address so it can be used as a map key.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

pub fn is_valid_address(address: &str) -> bool {
    let trimmed = address.trim();
    trimmed.len() == 42 && trimmed.starts_with("0x") && Address::from_str(trimmed).is_ok()
}

pub fn is_native(address: &str) -> bool {
    normalize_address(address) == NATIVE_TOKEN_ADDRESS
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Renders an integer amount in smallest units as a decimal string,
/// e.g. `("1500000", 6)` -> `"1.5"`.
pub fn format_units(raw: &str, decimals: u8) -> String {
    let digits = raw.trim().trim_start_matches('0');
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return "0".to_string();
    }

    let decimals = decimals as usize;
    let (int_part, frac_part) = if digits.len() > decimals {
        let split = digits.len() - decimals;
        (digits[..split].to_string(), digits[split..].to_string())
    } else {
        ("0".to_string(), format!("{:0>width$}", digits, width = decimals))
    };

    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.is_empty() {
        int_part
    } else {
        format!("{}.{}", int_part, frac_part)
    }
}

/// Converts a smallest-unit balance into a `Decimal` amount of whole tokens.
/// Fractional digits beyond what `Decimal` can hold are truncated and values
/// too large to represent saturate at `Decimal::MAX`.
pub fn to_token_amount(raw: &str, decimals: u8) -> Decimal {
    let formatted = format_units(raw, decimals);
    let (int_part, frac_part) = formatted.split_once('.').unwrap_or((formatted.as_str(), ""));

    if int_part.len() > MAX_DECIMAL_DIGITS {
        return Decimal::MAX;
    }

    let frac_budget = MAX_DECIMAL_DIGITS.saturating_sub(int_part.len());
    let frac = &frac_part[..frac_part.len().min(frac_budget)];
    let candidate = if frac.is_empty() {
        int_part.to_string()
    } else {
        format!("{}.{}", int_part, frac)
    };

    Decimal::from_str(&candidate).unwrap_or(Decimal::MAX)
}
