use serde_json::Value;

/// Masks sensitive fields in JSON payloads for logging
pub fn sanitize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sanitized = serde_json::Map::new();
            for (key, val) in map {
                let sanitized_val = if is_sensitive_field(key) {
                    mask_value(val)
                } else {
                    sanitize_json(val)
                };
                sanitized.insert(key.clone(), sanitized_val);
            }
            Value::Object(sanitized)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sanitize_json).collect()),
        _ => value.clone(),
    }
}

/// Keeps the first and last four characters of a wallet address.
pub fn mask_wallet(address: &str) -> String {
    if address.len() > 8 && address.is_ascii() {
        format!("{}****{}", &address[..4], &address[address.len() - 4..])
    } else {
        "****".to_string()
    }
}

fn is_sensitive_field(key: &str) -> bool {
    matches!(
        key.to_ascii_lowercase().as_str(),
        "walletaddress"
            | "wallet_address"
            | "senderwallet"
            | "recipientwallet"
            | "counterpartywallet"
            | "password"
            | "secret"
            | "token"
            | "api_key"
            | "authorization"
    )
}

fn mask_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(mask_wallet(s)),
        _ => Value::String("****".to_string()),
    }
}
