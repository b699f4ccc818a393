// Scripted ledger used by unit tests across the crate.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

use crate::chain::abi::{
    aggregate3Call, expiryCall, getParametersCall, getStatusCall, getTermsCall, resolveCall,
    Multicall3Result,
};
use crate::chain::client::LedgerClient;
use crate::error::RpcError;

/// On-chain view of one mocked contract
#[derive(Debug, Clone)]
pub struct MockContract {
    pub long_party: Address,
    pub short_party: Address,
    pub strike: U256,
    pub notional: U256,
    pub premium: U256,
    pub funded: bool,
    pub active: bool,
    pub exercised: bool,
    pub resolved: bool,
    pub expiry: U256,
    pub price_at_expiry: U256,
    /// `None` makes `getParameters` revert
    pub params: Option<Bytes>,
    /// `getStatus` returns undecodable bytes
    pub malformed_status: bool,
}

impl MockContract {
    pub fn entered(expiry: u64) -> Self {
        Self {
            long_party: Address::repeat_byte(0x11),
            short_party: Address::repeat_byte(0x22),
            strike: U256::from(2_000_000_000u64),
            notional: U256::from(1_000_000_000_000_000_000u128),
            premium: U256::from(50_000_000u64),
            funded: true,
            active: true,
            exercised: false,
            resolved: false,
            expiry: U256::from(expiry),
            price_at_expiry: U256::ZERO,
            params: Some(Bytes::from_static(&[0x01, 0x02])),
            malformed_status: false,
        }
    }
}

pub struct MockLedger {
    pub multicall: Address,
    multicall_deployed: AtomicBool,
    resolve_on_send: AtomicBool,
    contracts: Mutex<HashMap<Address, MockContract>>,
    single_calls: AtomicUsize,
    aggregate_calls: AtomicUsize,
    code_probes: AtomicUsize,
    sends: Mutex<Vec<Address>>,
    send_failures: Mutex<VecDeque<RpcError>>,
    aggregate_failure: Mutex<Option<RpcError>>,
    send_gate: Mutex<Option<Arc<Semaphore>>>,
    pub send_started: Notify,
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            multicall: Address::repeat_byte(0xca),
            multicall_deployed: AtomicBool::new(true),
            resolve_on_send: AtomicBool::new(false),
            contracts: Mutex::new(HashMap::new()),
            single_calls: AtomicUsize::new(0),
            aggregate_calls: AtomicUsize::new(0),
            code_probes: AtomicUsize::new(0),
            sends: Mutex::new(Vec::new()),
            send_failures: Mutex::new(VecDeque::new()),
            aggregate_failure: Mutex::new(None),
            send_gate: Mutex::new(None),
            send_started: Notify::new(),
        }
    }

    pub fn without_multicall(self) -> Self {
        self.multicall_deployed.store(false, Ordering::SeqCst);
        self
    }

    pub fn insert(&self, address: Address, contract: MockContract) {
        self.contracts.lock().insert(address, contract);
    }

    pub fn update(&self, address: Address, f: impl FnOnce(&mut MockContract)) {
        if let Some(contract) = self.contracts.lock().get_mut(&address) {
            f(contract);
        }
    }

    /// Resolve submissions flip the contract to resolved on chain
    pub fn resolve_on_send(&self, enabled: bool) {
        self.resolve_on_send.store(enabled, Ordering::SeqCst);
    }

    /// Hold every submission until a permit is added to the returned semaphore
    pub fn gate_sends(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.send_gate.lock() = Some(gate.clone());
        gate
    }

    /// Every aggregator `eth_call` fails with `err` while the bytecode stays deployed
    pub fn fail_aggregate(&self, err: RpcError) {
        *self.aggregate_failure.lock() = Some(err);
    }

    pub fn fail_next_send(&self, err: RpcError) {
        self.send_failures.lock().push_back(err);
    }

    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }

    pub fn aggregate_calls(&self) -> usize {
        self.aggregate_calls.load(Ordering::SeqCst)
    }

    pub fn code_probes(&self) -> usize {
        self.code_probes.load(Ordering::SeqCst)
    }

    pub fn sends_for(&self, address: Address) -> usize {
        self.sends.lock().iter().filter(|a| **a == address).count()
    }

    pub fn total_sends(&self) -> usize {
        self.sends.lock().len()
    }

    fn dispatch(&self, target: Address, payload: &[u8]) -> Result<Bytes, RpcError> {
        let contracts = self.contracts.lock();
        let Some(contract) = contracts.get(&target) else {
            // eth_call against an empty account succeeds with no data
            return Ok(Bytes::new());
        };
        if payload.len() < 4 {
            return Err(RpcError::Reverted("missing selector".into()));
        }

        let selector = &payload[..4];
        let encoded = if selector == getTermsCall::SELECTOR {
            getTermsCall::abi_encode_returns(&(
                contract.long_party,
                contract.short_party,
                contract.strike,
                contract.notional,
                contract.premium,
            ))
        } else if selector == getStatusCall::SELECTOR {
            if contract.malformed_status {
                vec![0xde, 0xad]
            } else {
                getStatusCall::abi_encode_returns(&(
                    contract.funded,
                    contract.active,
                    contract.exercised,
                    contract.resolved,
                    contract.expiry,
                    contract.price_at_expiry,
                ))
            }
        } else if selector == getParametersCall::SELECTOR {
            match &contract.params {
                Some(params) => getParametersCall::abi_encode_returns(&(params.clone(),)),
                None => return Err(RpcError::Reverted("parameters unsupported".into())),
            }
        } else if selector == expiryCall::SELECTOR {
            expiryCall::abi_encode_returns(&(contract.expiry,))
        } else {
            return Err(RpcError::Reverted("unknown selector".into()));
        };

        Ok(Bytes::from(encoded))
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn call(&self, target: Address, payload: Bytes) -> Result<Bytes, RpcError> {
        if target != self.multicall {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
            return self.dispatch(target, &payload);
        }

        self.aggregate_calls.fetch_add(1, Ordering::SeqCst);
        if !self.multicall_deployed.load(Ordering::SeqCst) {
            return Ok(Bytes::new());
        }
        if let Some(err) = self.aggregate_failure.lock().clone() {
            return Err(err);
        }

        let request = aggregate3Call::abi_decode(&payload, true)
            .map_err(|e| RpcError::Reverted(e.to_string()))?;
        let results: Vec<Multicall3Result> = request
            .calls
            .iter()
            .map(|call| match self.dispatch(call.target, &call.callData) {
                Ok(data) => Multicall3Result {
                    success: true,
                    returnData: data,
                },
                Err(_) => Multicall3Result {
                    success: false,
                    returnData: Bytes::new(),
                },
            })
            .collect();

        Ok(Bytes::from(aggregate3Call::abi_encode_returns(&(results,))))
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, RpcError> {
        self.code_probes.fetch_add(1, Ordering::SeqCst);
        if address == self.multicall && self.multicall_deployed.load(Ordering::SeqCst) {
            return Ok(Bytes::from_static(&[0x60, 0x80, 0x60, 0x40]));
        }
        Ok(Bytes::new())
    }

    async fn send_transaction(&self, target: Address, payload: Bytes) -> Result<B256, RpcError> {
        let index = {
            let mut sends = self.sends.lock();
            sends.push(target);
            sends.len()
        };
        self.send_started.notify_one();

        let gate = self.send_gate.lock().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        if let Some(err) = self.send_failures.lock().pop_front() {
            return Err(err);
        }

        if payload.starts_with(&resolveCall::SELECTOR[..]) && self.resolve_on_send.load(Ordering::SeqCst) {
            self.update(target, |c| c.resolved = true);
        }

        Ok(B256::with_last_byte(index as u8))
    }
}
