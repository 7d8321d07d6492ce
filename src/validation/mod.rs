use bigdecimal::BigDecimal;
use std::fmt;

pub const WALLET_ADDRESS_MAX_LEN: usize = 128;
pub const TRANSACTION_HASH_MAX_LEN: usize = 128;
pub const NETWORK_MAX_LEN: usize = 32;
pub const CANCELLATION_REASON_MAX_LEN: usize = 500;
pub const ERROR_MESSAGE_MAX_LEN: usize = 1000;
pub const ALLOWED_DELIVERY_METHODS: &[&str] = &["vault_pickup", "insured_shipping", "courier"];
pub const ALLOWED_PAYMENT_METHODS: &[&str] = &["card", "bank_transfer", "crypto"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control() || ch.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_enum(field: &'static str, value: &str, allowed: &[&str]) -> ValidationResult {
    if allowed.iter().all(|candidate| value != *candidate) {
        return Err(ValidationError::new(
            field,
            format!("must be one of: {}", allowed.join(", ")),
        ));
    }

    Ok(())
}

/// Wallet addresses are opaque per network; only shape is checked here.
pub fn validate_wallet_address(field: &'static str, address: &str) -> ValidationResult {
    validate_required(field, address)?;
    validate_max_len(field, address, WALLET_ADDRESS_MAX_LEN)?;

    if !address.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(ValidationError::new(
            field,
            "must contain only ASCII letters and digits",
        ));
    }

    Ok(())
}

pub fn validate_transaction_hash(hash: &str) -> ValidationResult {
    validate_required("transaction_hash", hash)?;
    validate_max_len("transaction_hash", hash, TRANSACTION_HASH_MAX_LEN)
}

pub fn validate_positive_amount(field: &'static str, amount: &BigDecimal) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new(field, "must be greater than zero"));
    }

    Ok(())
}

pub fn validate_non_negative_amount(field: &'static str, amount: &BigDecimal) -> ValidationResult {
    if amount < &BigDecimal::from(0) {
        return Err(ValidationError::new(field, "must not be negative"));
    }

    Ok(())
}

pub fn validate_quantity(quantity: i32) -> ValidationResult {
    if quantity < 1 {
        return Err(ValidationError::new("quantity", "must be at least 1"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn validates_required_field() {
        assert!(validate_required("field", "value").is_ok());
        assert!(validate_required("field", "   ").is_err());
    }

    #[test]
    fn validates_max_len() {
        assert!(validate_max_len("field", "abc", 3).is_ok());
        assert!(validate_max_len("field", "abcd", 3).is_err());
    }

    #[test]
    fn validates_enum_values() {
        assert!(validate_enum("delivery_method", "courier", ALLOWED_DELIVERY_METHODS).is_ok());
        assert!(validate_enum("delivery_method", "drone", ALLOWED_DELIVERY_METHODS).is_err());
    }

    #[test]
    fn sanitizes_string() {
        assert_eq!(sanitize_string("  hello\tworld  "), "hello world");
        assert_eq!(sanitize_string(" \n "), "");
        assert_eq!(sanitize_string("ab\u{0000}cd\u{0007}"), "abcd");
        assert_eq!(
            sanitize_string("moved house\r\nnew address pending"),
            "moved house new address pending"
        );
    }

    #[test]
    fn validates_wallet_address() {
        assert!(validate_wallet_address("wallet_address", "0xAbC123").is_ok());
        assert!(validate_wallet_address("wallet_address", "").is_err());
        assert!(validate_wallet_address("wallet_address", "0x abc").is_err());
        assert!(validate_wallet_address("wallet_address", &"a".repeat(129)).is_err());
    }

    #[test]
    fn validates_amounts() {
        let zero = BigDecimal::from(0);
        let positive = BigDecimal::from_str("0.01").unwrap();
        let negative = BigDecimal::from_str("-1").unwrap();

        assert!(validate_positive_amount("grams", &positive).is_ok());
        assert!(validate_positive_amount("grams", &zero).is_err());
        assert!(validate_non_negative_amount("delivery_fee", &zero).is_ok());
        assert!(validate_non_negative_amount("delivery_fee", &negative).is_err());
    }

    #[test]
    fn validates_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(0).is_err());
    }

    #[test]
    fn validation_error_displays_field() {
        let err = ValidationError::new("quantity", "must be at least 1");
        assert_eq!(err.to_string(), "quantity: must be at least 1");
    }
}
