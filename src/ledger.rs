//! Prepaid ledger balance: amounts, the ledger client seam, and the
//! top-up-before-request funding policy.
//!
//! All balance arithmetic happens on [`Amount`], an integer count of the
//! smallest unit (neuron, 10^18 per OG). Decimal OG strings are only parsed
//! at the config/CLI boundary.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::error::InferenceError;
use crate::wallet::Identity;

/// Number of fractional decimal digits in one OG.
pub const OG_DECIMALS: u32 = 18;
const NEURON_PER_OG: u128 = 1_000_000_000_000_000_000;

/// Monetary amount in neuron.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_neuron(neuron: u128) -> Self {
        Self(neuron)
    }

    /// Whole OG units.
    pub const fn from_og(og: u64) -> Self {
        Self(og as u128 * NEURON_PER_OG)
    }

    pub const fn neuron(self) -> u128 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Parse a decimal OG string such as `"0.1"` or `"1"`.
    pub fn parse_og(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        let trimmed = trimmed
            .strip_suffix("OG")
            .or_else(|| trimmed.strip_suffix("og"))
            .unwrap_or(trimmed)
            .trim();
        let value = Decimal::from_str(trimmed)
            .map_err(|e| format!("'{}' is not a decimal amount: {}", raw, e))?;
        if value.is_sign_negative() {
            return Err(format!("'{}' must not be negative", raw));
        }
        if value.scale() > OG_DECIMALS {
            let normalized = value.normalize();
            if normalized.scale() > OG_DECIMALS {
                return Err(format!(
                    "'{}' has more than {} fractional digits",
                    raw, OG_DECIMALS
                ));
            }
        }

        let whole = value.trunc();
        let fraction = value - whole;
        let whole = whole
            .to_u128()
            .and_then(|w| w.checked_mul(NEURON_PER_OG))
            .ok_or_else(|| format!("'{}' is too large", raw))?;
        // `fraction` < 1, so scaling by 10^18 stays inside Decimal's range.
        let fraction = (fraction * Decimal::from(NEURON_PER_OG as u64))
            .trunc()
            .to_u128()
            .ok_or_else(|| format!("'{}' is too large", raw))?;
        whole
            .checked_add(fraction)
            .map(Self)
            .ok_or_else(|| format!("'{}' is too large", raw))
    }

    /// Render as a decimal OG string without trailing zeros.
    pub fn to_og_string(self) -> String {
        let whole = self.0 / NEURON_PER_OG;
        let fraction = self.0 % NEURON_PER_OG;
        if fraction == 0 {
            return whole.to_string();
        }
        let digits = format!("{:018}", fraction);
        format!("{}.{}", whole, digits.trim_end_matches('0'))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} OG", self.to_og_string())
    }
}

// Neuron amounts exceed JSON's safe integer range, so they travel as strings.
impl Serialize for Amount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text
                .trim()
                .parse::<u128>()
                .map(Amount)
                .map_err(serde::de::Error::custom),
            Raw::Number(n) => Ok(Amount(n as u128)),
        }
    }
}

/// Prepaid balance held by the ledger contract for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerAccount {
    pub total_balance: Amount,
}

/// Ledger seam. Implementations talk to the broker's ledger contract.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current prepaid balance.
    ///
    /// Returns `InferenceError::Identity { kind: NoLedgerAccount, .. }` on
    /// first use, before any deposit has been made.
    async fn get_balance(&self, identity: &Identity) -> Result<LedgerAccount, InferenceError>;

    /// Deposit `amount` from the wallet into the ledger.
    ///
    /// Not idempotent. Callers must not retry unless the failure is known
    /// not to have been committed.
    async fn top_up(&self, identity: &Identity, amount: Amount) -> Result<(), InferenceError>;
}

/// When and by how much to refill the ledger before a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingPolicy {
    /// Top up when the balance is strictly below this.
    pub threshold: Amount,
    /// Amount deposited per top-up.
    pub top_up_amount: Amount,
}

impl Default for FundingPolicy {
    fn default() -> Self {
        Self {
            threshold: Amount::from_neuron(NEURON_PER_OG / 10),
            top_up_amount: Amount::from_og(1),
        }
    }
}

/// What the funding precondition did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundingOutcome {
    Sufficient { balance: Amount },
    ToppedUp { previous: Amount, deposited: Amount },
}

/// Reject non-positive deposit amounts before any I/O.
pub fn validate_top_up(amount: Amount) -> Result<(), InferenceError> {
    if amount.is_zero() {
        return Err(InferenceError::InvalidAmount {
            reason: "top-up amount must be positive".to_string(),
        });
    }
    Ok(())
}

/// Check the balance and deposit once if it is below the threshold.
pub async fn ensure_funded(
    ledger: &dyn LedgerClient,
    identity: &Identity,
    policy: &FundingPolicy,
) -> Result<FundingOutcome, InferenceError> {
    let balance = match ledger.get_balance(identity).await {
        Ok(account) => account.total_balance,
        Err(e) if e.is_missing_ledger_account() => {
            tracing::debug!(
                address = %identity.address(),
                "No ledger account yet, treating balance as zero"
            );
            Amount::ZERO
        }
        Err(e) => return Err(e),
    };

    if balance >= policy.threshold {
        tracing::debug!(%balance, threshold = %policy.threshold, "Ledger balance sufficient");
        return Ok(FundingOutcome::Sufficient { balance });
    }

    validate_top_up(policy.top_up_amount)?;
    tracing::info!(
        address = %identity.address(),
        %balance,
        deposit = %policy.top_up_amount,
        "Ledger balance below threshold, topping up"
    );
    ledger.top_up(identity, policy.top_up_amount).await?;

    Ok(FundingOutcome::ToppedUp {
        previous: balance,
        deposited: policy.top_up_amount,
    })
}
