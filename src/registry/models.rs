use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{AppError, AppResult};

/// Contract family; decides where the resolution expiry comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractKind {
    Option,
    Future,
    Exotic,
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ContractKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractKind::Option => "option",
            ContractKind::Future => "future",
            ContractKind::Exotic => "exotic",
        }
    }

    /// Kinds that record their own expiry on chain
    pub fn has_onchain_expiry(&self) -> bool {
        matches!(self, ContractKind::Future | ContractKind::Exotic)
    }
}

impl FromStr for ContractKind {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "option" => Ok(ContractKind::Option),
            "future" => Ok(ContractKind::Future),
            "exotic" => Ok(ContractKind::Exotic),
            other => Err(AppError::InvalidInput(format!("Unknown contract kind: {}", other))),
        }
    }
}

/// Fixed-point integer amount, carried as a decimal string on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(pub U256);

impl Amount {
    pub const ZERO: Amount = Amount(U256::ZERO);

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<U256> for Amount {
    fn from(value: U256) -> Self {
        Amount(value)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Amount(U256::from(value))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let digits = raw.trim();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AppError::InvalidInput(format!(
                "Amount must be a decimal integer string, got {:?}",
                raw
            )));
        }
        U256::from_str_radix(digits, 10)
            .map(Amount)
            .map_err(|e| AppError::InvalidInput(format!("Amount out of range: {}", e)))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Amount::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

/// Local mirror of one tracked contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRecord {
    pub address: Address,
    pub kind: ContractKind,
    pub counterparty_long: Option<Address>,
    pub counterparty_short: Option<Address>,
    pub strike_price: Amount,
    pub notional_size: Amount,
    pub premium: Amount,
    /// Unix seconds; `None` until the contract is armed
    pub expiry_timestamp: Option<u64>,
    pub is_funded: bool,
    pub is_active: bool,
    pub is_exercised: bool,
    pub is_resolved: bool,
    pub price_at_expiry: Option<Amount>,
    pub created_at: DateTime<Utc>,
    pub funded_at: Option<DateTime<Utc>>,
    pub entered_at: Option<DateTime<Utc>>,
    pub exercised_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ContractRecord {
    pub fn new(contract: NewContract, created_at: DateTime<Utc>) -> Self {
        Self {
            address: contract.address,
            kind: contract.kind,
            counterparty_long: None,
            counterparty_short: contract.counterparty_short,
            strike_price: contract.strike_price,
            notional_size: contract.notional_size,
            premium: contract.premium,
            expiry_timestamp: contract.expiry_timestamp.filter(|t| *t > 0),
            is_funded: false,
            is_active: false,
            is_exercised: false,
            is_resolved: false,
            price_at_expiry: None,
            created_at,
            funded_at: None,
            entered_at: None,
            exercised_at: None,
            resolved_at: None,
        }
    }

    /// Entered, armed and still waiting for a terminal transition
    pub fn awaits_expiry(&self) -> bool {
        self.is_active
            && self.expiry_timestamp.is_some_and(|t| t > 0)
            && !self.is_resolved
            && !self.is_exercised
    }
}

/// Registration payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContract {
    pub address: Address,
    pub kind: ContractKind,
    #[serde(default)]
    pub counterparty_short: Option<Address>,
    pub strike_price: Amount,
    pub notional_size: Amount,
    #[serde(default)]
    pub premium: Amount,
    #[serde(default)]
    pub expiry_timestamp: Option<u64>,
}

pub fn parse_address(raw: &str) -> AppResult<Address> {
    Address::from_str(raw.trim()).map_err(|_| AppError::InvalidAddress(raw.to_string()))
}
