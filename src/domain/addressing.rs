//! Identifier grammars and the account URI / ILP address translation.

use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

fn is_address_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '~' | '.')
}

/// `^[A-Za-z0-9\-_~.]+$`
pub fn is_valid_address(address: &str) -> bool {
    !address.is_empty() && address.chars().all(is_address_char)
}

/// A routing prefix is a valid address ending in a dot.
pub fn is_valid_prefix(prefix: &str) -> bool {
    prefix.len() > 1 && prefix.ends_with('.') && is_valid_address(prefix)
}

/// `^[A-Za-z0-9\-_]*$`
pub fn is_base64url(input: &str) -> bool {
    input
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Amount grammar `^(0\.|[1-9]\d*\.?)\d*$`: no leading zeros, optional fraction.
pub fn is_valid_amount(amount: &str) -> bool {
    let (integer, fraction) = match amount.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (amount, None),
    };
    let digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());

    let integer_ok = match integer.as_bytes() {
        [b'0'] => fraction.is_some(),
        [first, ..] => (b'1'..=b'9').contains(first) && digits(integer),
        [] => false,
    };
    integer_ok && fraction.is_none_or(digits)
}

/// Parses an amount that satisfies [`is_valid_amount`].
pub fn parse_amount(amount: &str) -> Option<Decimal> {
    if !is_valid_amount(amount) {
        return None;
    }
    Decimal::from_str(amount.trim_end_matches('.')).ok()
}

/// Accepts only the canonical lowercase hyphenated form.
pub fn parse_payment_id(raw: &str) -> Option<Uuid> {
    const GROUPS: [usize; 5] = [8, 4, 4, 4, 12];

    let mut parts = raw.split('-');
    for expected in GROUPS {
        let part = parts.next()?;
        if part.len() != expected
            || !part.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
        {
            return None;
        }
    }
    if parts.next().is_some() {
        return None;
    }
    Uuid::parse_str(raw).ok()
}

/// Shifts `amount` left by `scale` decimal places (display units to ledger units).
pub fn scale_amount(amount: Decimal, scale: u32) -> Option<Decimal> {
    let factor = Decimal::from(10u64.checked_pow(scale)?);
    amount.checked_mul(factor).map(|d| d.normalize())
}

/// Inverse of [`scale_amount`].
pub fn unscale_amount(amount: Decimal, scale: u32) -> Option<Decimal> {
    let factor = Decimal::from(10u64.checked_pow(scale)?);
    amount.checked_div(factor).map(|d| d.normalize())
}

/// Static description of the ledger needed to translate identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerContext {
    /// Account URI template containing `:name`, e.g. `https://ledger.example/accounts/:name`.
    pub account_template: String,
    pub currency_scale: u32,
}

impl LedgerContext {
    pub fn new(account_template: impl Into<String>, currency_scale: u32) -> Self {
        Self {
            account_template: account_template.into(),
            currency_scale,
        }
    }

    pub fn account_uri(&self, username: &str) -> String {
        self.account_template.replace(":name", username)
    }

    pub fn account_to_username(&self, account: &str) -> Option<String> {
        let (head, tail) = self.account_template.split_once(":name")?;
        let username = account.strip_prefix(head)?.strip_suffix(tail)?;
        if username.is_empty() || !is_valid_address(username) || username.contains('.') {
            return None;
        }
        Some(username.to_string())
    }

    /// Extracts the local username of an address under `prefix`.
    pub fn address_to_username<'a>(&self, prefix: &str, address: &'a str) -> Option<&'a str> {
        let local = address.strip_prefix(prefix)?;
        local.split('.').next().filter(|name| !name.is_empty())
    }

    pub fn address_to_account(&self, prefix: &str, address: &str) -> Option<String> {
        self.address_to_username(prefix, address)
            .map(|username| self.account_uri(username))
    }
}
