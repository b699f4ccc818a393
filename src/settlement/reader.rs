use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use tracing::{debug, warn};

use crate::batcher::{CallBatcher, CallDescriptor, SlotOutcome};
use crate::chain::abi::{expiryCall, getParametersCall, getStatusCall, getTermsCall};
use crate::registry::{Amount, ContractRecord};

/// Live contract state as read from the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainState {
    pub long_party: Address,
    pub short_party: Address,
    pub strike_price: Amount,
    pub notional_size: Amount,
    pub premium: Amount,
    pub funded: bool,
    pub active: bool,
    pub exercised: bool,
    pub resolved: bool,
    /// 0 when the contract has not recorded one
    pub expiry_timestamp: u64,
    pub price_at_expiry: Amount,
    /// `None` when the contract kind has no parameter getter
    pub parameters: Option<Bytes>,
}

impl OnChainState {
    /// Local record overlaid with live state. Terminal flags only ever turn on.
    pub fn merge_into(&self, record: &ContractRecord) -> ContractRecord {
        let mut merged = record.clone();
        if self.long_party != Address::ZERO {
            merged.counterparty_long = Some(self.long_party);
        }
        if self.short_party != Address::ZERO {
            merged.counterparty_short = Some(self.short_party);
        }
        merged.strike_price = self.strike_price;
        merged.notional_size = self.notional_size;
        merged.premium = self.premium;
        merged.is_funded |= self.funded;
        merged.is_active |= self.active;
        merged.is_exercised |= self.exercised;
        merged.is_resolved |= self.resolved;
        if self.expiry_timestamp > 0 {
            merged.expiry_timestamp = Some(self.expiry_timestamp);
        }
        if !self.price_at_expiry.is_zero() {
            merged.price_at_expiry = Some(self.price_at_expiry);
        }
        merged
    }
}

/// Ordered per-address states plus which batch path served them
#[derive(Debug, Clone)]
pub struct StateRead {
    pub states: Vec<Option<OnChainState>>,
    pub aggregated: bool,
}

#[derive(Debug, Clone)]
enum StateSlot {
    Terms {
        long_party: Address,
        short_party: Address,
        strike_price: U256,
        notional_size: U256,
        premium: U256,
    },
    Status {
        funded: bool,
        active: bool,
        exercised: bool,
        resolved: bool,
        expiry_timestamp: U256,
        price_at_expiry: U256,
    },
    Parameters(Option<Bytes>),
}

const SLOTS_PER_CONTRACT: usize = 3;

fn to_unix(value: U256) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// Reads contract state through the batcher: one round trip for any number of contracts
pub struct ChainStateReader {
    batcher: Arc<CallBatcher>,
}

impl ChainStateReader {
    pub fn new(batcher: Arc<CallBatcher>) -> Self {
        Self { batcher }
    }

    pub fn batcher(&self) -> &Arc<CallBatcher> {
        &self.batcher
    }

    fn descriptors(address: Address) -> [CallDescriptor<StateSlot>; SLOTS_PER_CONTRACT] {
        [
            CallDescriptor::typed(address, getTermsCall {}, |r| StateSlot::Terms {
                long_party: r.longParty,
                short_party: r.shortParty,
                strike_price: r.strikePrice,
                notional_size: r.notionalSize,
                premium: r.premium,
            }),
            CallDescriptor::typed(address, getStatusCall {}, |r| StateSlot::Status {
                funded: r.funded,
                active: r.active,
                exercised: r.exercised,
                resolved: r.resolved,
                expiry_timestamp: r.expiryTimestamp,
                price_at_expiry: r.priceAtExpiry,
            }),
            CallDescriptor::typed(address, getParametersCall {}, |r| {
                StateSlot::Parameters(Some(r.params))
            })
            .with_fallback(StateSlot::Parameters(None)),
        ]
    }

    /// Read the state of every address; a slot is `None` when terms or status could not be read
    pub async fn read_states(&self, addresses: &[Address]) -> StateRead {
        let calls: Vec<CallDescriptor<StateSlot>> = addresses
            .iter()
            .flat_map(|address| Self::descriptors(*address))
            .collect();

        let result = self.batcher.aggregate(&calls).await;
        let aggregated = result.aggregated;
        let failures = result.failures();
        if failures > 0 {
            debug!(
                "{} of {} state slots for {} contracts did not decode",
                failures,
                calls.len(),
                addresses.len()
            );
        }

        let states = result
            .slots
            .chunks(SLOTS_PER_CONTRACT)
            .zip(addresses)
            .map(|(slots, address)| assemble(*address, slots))
            .collect();

        StateRead { states, aggregated }
    }

    pub async fn read_state(&self, address: Address) -> Option<OnChainState> {
        self.read_states(&[address]).await.states.into_iter().next().flatten()
    }

    /// Expiry recorded on chain for each address; `None` when unreadable or unset
    pub async fn read_expiries(&self, addresses: &[Address]) -> Vec<Option<u64>> {
        let calls: Vec<CallDescriptor<u64>> = addresses
            .iter()
            .map(|address| CallDescriptor::typed(*address, expiryCall {}, |r| to_unix(r.expiryTimestamp)))
            .collect();

        self.batcher
            .aggregate(&calls)
            .await
            .into_values()
            .into_iter()
            .map(|value| value.filter(|t| *t > 0))
            .collect()
    }

    pub async fn read_expiry(&self, address: Address) -> Option<u64> {
        self.read_expiries(&[address]).await.into_iter().next().flatten()
    }
}

fn assemble(address: Address, slots: &[SlotOutcome<StateSlot>]) -> Option<OnChainState> {
    let (terms, status, parameters) = match slots {
        [terms, status, parameters] => (terms.value(), status.value(), parameters.value()),
        _ => return None,
    };

    let (
        Some(StateSlot::Terms {
            long_party,
            short_party,
            strike_price,
            notional_size,
            premium,
        }),
        Some(StateSlot::Status {
            funded,
            active,
            exercised,
            resolved,
            expiry_timestamp,
            price_at_expiry,
        }),
    ) = (terms, status)
    else {
        warn!("⚠️ Could not read state of {}, omitting", address);
        return None;
    };

    let parameters = match parameters {
        Some(StateSlot::Parameters(params)) => params.clone(),
        _ => None,
    };

    Some(OnChainState {
        long_party: *long_party,
        short_party: *short_party,
        strike_price: Amount(*strike_price),
        notional_size: Amount(*notional_size),
        premium: Amount(*premium),
        funded: *funded,
        active: *active,
        exercised: *exercised,
        resolved: *resolved,
        expiry_timestamp: to_unix(*expiry_timestamp),
        price_at_expiry: Amount(*price_at_expiry),
        parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::BatcherConfig;
    use crate::chain::mock::{MockContract, MockLedger};
    use crate::chain::RetryPolicy;
    use std::time::Duration;

    fn reader(ledger: Arc<MockLedger>) -> ChainStateReader {
        let multicall = ledger.multicall;
        ChainStateReader::new(Arc::new(CallBatcher::new(
            ledger,
            BatcherConfig {
                multicall_address: Some(multicall),
                probe_ttl: Duration::from_secs(60),
                retry: RetryPolicy::default(),
            },
        )))
    }

    #[tokio::test]
    async fn test_three_reads_per_contract_in_one_round_trip() {
        let ledger = Arc::new(MockLedger::new());
        let addresses: Vec<Address> = (1..=4).map(Address::repeat_byte).collect();
        for (i, address) in addresses.iter().enumerate() {
            ledger.insert(*address, MockContract::entered(5_000 + i as u64));
        }

        let read = reader(ledger.clone()).read_states(&addresses).await;

        assert!(read.aggregated);
        assert_eq!(ledger.aggregate_calls(), 1);
        assert_eq!(read.states.len(), 4);
        let third = read.states[2].as_ref().unwrap();
        assert_eq!(third.expiry_timestamp, 5_002);
        assert_eq!(third.long_party, Address::repeat_byte(0x11));
        assert_eq!(third.parameters, Some(Bytes::from_static(&[0x01, 0x02])));
    }

    #[tokio::test]
    async fn test_missing_parameters_do_not_hide_contract() {
        let ledger = Arc::new(MockLedger::new());
        let address = Address::repeat_byte(7);
        ledger.insert(address, MockContract::entered(5_000));
        ledger.update(address, |c| c.params = None);

        let state = reader(ledger).read_state(address).await.unwrap();
        assert_eq!(state.parameters, None);
        assert!(state.active);
    }

    #[tokio::test]
    async fn test_undecodable_status_omits_only_that_contract() {
        let ledger = Arc::new(MockLedger::new());
        let good = Address::repeat_byte(1);
        let bad = Address::repeat_byte(2);
        ledger.insert(good, MockContract::entered(5_000));
        ledger.insert(bad, MockContract::entered(5_000));
        ledger.update(bad, |c| c.malformed_status = true);

        let read = reader(ledger).read_states(&[good, bad]).await;
        assert!(read.states[0].is_some());
        assert!(read.states[1].is_none());
    }

    #[tokio::test]
    async fn test_read_expiry() {
        let ledger = Arc::new(MockLedger::new());
        let armed = Address::repeat_byte(1);
        let unset = Address::repeat_byte(2);
        ledger.insert(armed, MockContract::entered(9_000));
        ledger.insert(unset, MockContract::entered(0));

        let reader = reader(ledger);
        assert_eq!(reader.read_expiry(armed).await, Some(9_000));
        assert_eq!(reader.read_expiry(unset).await, None);
        assert_eq!(reader.read_expiry(Address::repeat_byte(3)).await, None);
    }

    #[test]
    fn test_merge_only_turns_terminal_flags_on() {
        use crate::registry::{ContractKind, NewContract};

        let mut record = ContractRecord::new(
            NewContract {
                address: Address::repeat_byte(1),
                kind: ContractKind::Future,
                counterparty_short: None,
                strike_price: Amount::from(1u64),
                notional_size: Amount::from(1u64),
                premium: Amount::ZERO,
                expiry_timestamp: Some(100),
            },
            chrono::Utc::now(),
        );
        record.is_resolved = true;

        let state = OnChainState {
            long_party: Address::ZERO,
            short_party: Address::repeat_byte(0x22),
            strike_price: Amount::from(10u64),
            notional_size: Amount::from(2u64),
            premium: Amount::ZERO,
            funded: true,
            active: true,
            exercised: false,
            resolved: false,
            expiry_timestamp: 0,
            price_at_expiry: Amount::ZERO,
            parameters: None,
        };

        let merged = state.merge_into(&record);
        assert!(merged.is_resolved);
        assert!(merged.is_funded);
        assert_eq!(merged.counterparty_long, None);
        assert_eq!(merged.expiry_timestamp, Some(100));
        assert_eq!(merged.strike_price, Amount::from(10u64));
    }
}
