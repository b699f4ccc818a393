use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::registry::{Amount, ContractKind, NewContract};
use crate::settlement::{ContractMetadata, SchedulerStatus, SweepReport};

// ========== REQUEST MODELS ==========

/// Register a contract for tracking
/// POST /api/v1/contracts
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterContractRequest {
    #[validate(custom = "non_zero_address")]
    pub address: Address,
    pub kind: ContractKind,
    #[serde(default)]
    pub counterparty_short: Option<Address>,
    #[validate(custom = "non_zero_amount")]
    pub strike_price: Amount,
    #[validate(custom = "non_zero_amount")]
    pub notional_size: Amount,
    #[serde(default)]
    pub premium: Amount,
    #[serde(default)]
    #[validate(range(min = 1, message = "expiry_timestamp must be a positive unix time"))]
    pub expiry_timestamp: Option<u64>,
}

impl From<RegisterContractRequest> for NewContract {
    fn from(request: RegisterContractRequest) -> Self {
        NewContract {
            address: request.address,
            kind: request.kind,
            counterparty_short: request.counterparty_short,
            strike_price: request.strike_price,
            notional_size: request.notional_size,
            premium: request.premium,
            expiry_timestamp: request.expiry_timestamp,
        }
    }
}

impl From<NewContract> for RegisterContractRequest {
    fn from(contract: NewContract) -> Self {
        RegisterContractRequest {
            address: contract.address,
            kind: contract.kind,
            counterparty_short: contract.counterparty_short,
            strike_price: contract.strike_price,
            notional_size: contract.notional_size,
            premium: contract.premium,
            expiry_timestamp: contract.expiry_timestamp,
        }
    }
}

fn non_zero_amount(amount: &Amount) -> Result<(), ValidationError> {
    if amount.is_zero() {
        let mut error = ValidationError::new("non_zero");
        error.message = Some("must be greater than zero".into());
        return Err(error);
    }
    Ok(())
}

fn non_zero_address(address: &Address) -> Result<(), ValidationError> {
    if *address == Address::ZERO {
        let mut error = ValidationError::new("non_zero");
        error.message = Some("must not be the zero address".into());
        return Err(error);
    }
    Ok(())
}

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub store: &'static str,
    pub aggregator_available: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ContractListResponse {
    pub contracts: Vec<ContractMetadata>,
    pub count: usize,
    /// `true` when the chain reads went through the aggregator
    pub aggregated: bool,
}

#[derive(Debug, Serialize)]
pub struct ResolveExpiredResponse {
    /// Resolve transactions submitted by this sweep
    pub resolved_count: usize,
    pub report: SweepReport,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub scheduler: SchedulerStatus,
    pub uptime_secs: i64,
}
