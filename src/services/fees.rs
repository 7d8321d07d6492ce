//! Fee & conversion math. Pure functions, no I/O.

use bigdecimal::BigDecimal;
use serde::Serialize;

use crate::error::AppError;

/// Decimal places kept for USD amounts.
pub const USD_SCALE: i64 = 2;
/// Decimal places kept for token amounts (truncated).
pub const TOKEN_SCALE: i64 = 8;

/// Validated platform fee schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeConfig {
    fee_percent: BigDecimal,
    minimum_fee_usd: BigDecimal,
    maximum_fee_usd: Option<BigDecimal>,
}

impl FeeConfig {
    /// Rejects schedules the calculator cannot honour: negative percent or minimum,
    /// or a maximum below the minimum.
    pub fn new(
        fee_percent: BigDecimal,
        minimum_fee_usd: BigDecimal,
        maximum_fee_usd: Option<BigDecimal>,
    ) -> Result<Self, AppError> {
        let zero = BigDecimal::from(0);
        if fee_percent < zero {
            return Err(AppError::InvalidArgument(
                "fee percent must not be negative".to_string(),
            ));
        }
        if minimum_fee_usd < zero {
            return Err(AppError::InvalidArgument(
                "minimum fee must not be negative".to_string(),
            ));
        }
        if let Some(max) = &maximum_fee_usd {
            if max < &minimum_fee_usd {
                return Err(AppError::InvalidArgument(format!(
                    "maximum fee {} is below minimum fee {}",
                    max, minimum_fee_usd
                )));
            }
        }

        Ok(Self {
            fee_percent,
            minimum_fee_usd,
            maximum_fee_usd,
        })
    }

    pub fn fee_percent(&self) -> &BigDecimal {
        &self.fee_percent
    }

    pub fn minimum_fee_usd(&self) -> &BigDecimal {
        &self.minimum_fee_usd
    }

    pub fn maximum_fee_usd(&self) -> Option<&BigDecimal> {
        self.maximum_fee_usd.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformFee {
    pub fee_percent: BigDecimal,
    pub fee_amount_usd: BigDecimal,
    pub total_cost_usd: BigDecimal,
}

/// Percentage fee, floored at the minimum, then capped at the maximum.
pub fn calculate_platform_fee(value_usd: &BigDecimal, config: &FeeConfig) -> PlatformFee {
    let raw = value_usd * &config.fee_percent / BigDecimal::from(100);
    let floored = std::cmp::max(raw, config.minimum_fee_usd.clone());
    let fee = match &config.maximum_fee_usd {
        Some(max) => std::cmp::min(floored, max.clone()),
        None => floored,
    };
    let fee = fee.round(USD_SCALE);

    PlatformFee {
        fee_percent: config.fee_percent.clone(),
        total_cost_usd: (value_usd + &fee).round(USD_SCALE),
        fee_amount_usd: fee,
    }
}

/// Tokens bought by `usd_amount` when one token holds `mg_per_token` milligrams.
pub fn calculate_token_amount(
    usd_amount: &BigDecimal,
    price_per_gram: &BigDecimal,
    mg_per_token: &BigDecimal,
) -> Result<BigDecimal, AppError> {
    let zero = BigDecimal::from(0);
    if price_per_gram <= &zero {
        return Err(AppError::InvalidArgument(
            "price per gram must be greater than zero".to_string(),
        ));
    }
    if mg_per_token <= &zero {
        return Err(AppError::InvalidArgument(
            "milligrams per token must be greater than zero".to_string(),
        ));
    }

    let price_per_token = price_per_gram / BigDecimal::from(1000) * mg_per_token;
    Ok((usd_amount / price_per_token).with_scale(TOKEN_SCALE))
}

/// Tokens represented by a mass of metal.
pub fn grams_to_tokens(grams: &BigDecimal, mg_per_token: &BigDecimal) -> Result<BigDecimal, AppError> {
    if mg_per_token <= &BigDecimal::from(0) {
        return Err(AppError::InvalidArgument(
            "milligrams per token must be greater than zero".to_string(),
        ));
    }
    Ok((grams * BigDecimal::from(1000) / mg_per_token).with_scale(TOKEN_SCALE))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionCost {
    pub token_value_usd: BigDecimal,
    pub platform_fee_usd: BigDecimal,
    pub delivery_fee: BigDecimal,
    pub total_cost_usd: BigDecimal,
}

/// Cost of redeeming `grams` of metal for physical delivery.
pub fn calculate_redemption_cost(
    grams: &BigDecimal,
    price_per_gram: &BigDecimal,
    delivery_fee: &BigDecimal,
    config: &FeeConfig,
) -> Result<RedemptionCost, AppError> {
    let zero = BigDecimal::from(0);
    if grams <= &zero {
        return Err(AppError::InvalidArgument(
            "grams must be greater than zero".to_string(),
        ));
    }
    if price_per_gram <= &zero {
        return Err(AppError::InvalidArgument(
            "price per gram must be greater than zero".to_string(),
        ));
    }
    if delivery_fee < &zero {
        return Err(AppError::InvalidArgument(
            "delivery fee must not be negative".to_string(),
        ));
    }

    let token_value_usd = (grams * price_per_gram).round(USD_SCALE);
    let fee = calculate_platform_fee(&token_value_usd, config);
    let delivery_fee = delivery_fee.round(USD_SCALE);

    Ok(RedemptionCost {
        total_cost_usd: (&fee.total_cost_usd + &delivery_fee).round(USD_SCALE),
        token_value_usd,
        platform_fee_usd: fee.fee_amount_usd,
        delivery_fee,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseQuote {
    pub gross_usd: BigDecimal,
    pub fee_amount_usd: BigDecimal,
    pub net_usd: BigDecimal,
    pub token_amount: BigDecimal,
}

/// Splits a gross payment into the platform fee and the tokens the remainder buys.
pub fn calculate_purchase(
    gross_usd: &BigDecimal,
    price_per_gram: &BigDecimal,
    mg_per_token: &BigDecimal,
    config: &FeeConfig,
) -> Result<PurchaseQuote, AppError> {
    if gross_usd <= &BigDecimal::from(0) {
        return Err(AppError::InvalidArgument(
            "purchase amount must be greater than zero".to_string(),
        ));
    }

    let fee = calculate_platform_fee(gross_usd, config).fee_amount_usd;
    let net_usd = (gross_usd - &fee).round(USD_SCALE);
    if net_usd <= BigDecimal::from(0) {
        return Err(AppError::InvalidArgument(format!(
            "purchase amount {} does not cover the platform fee {}",
            gross_usd, fee
        )));
    }
    let token_amount = calculate_token_amount(&net_usd, price_per_gram, mg_per_token)?;

    Ok(PurchaseQuote {
        gross_usd: gross_usd.clone(),
        fee_amount_usd: fee,
        net_usd,
        token_amount,
    })
}
