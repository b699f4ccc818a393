use std::fmt;
use std::sync::Arc;

use alloy_primitives::{Address, Bytes};
use alloy_sol_types::SolCall;

use crate::error::DecodeError;

pub type Decoder<T> = Arc<dyn Fn(&[u8]) -> Result<T, DecodeError> + Send + Sync>;

/// One read request inside a batch. Immutable once built.
#[derive(Clone)]
pub struct CallDescriptor<T> {
    pub target: Address,
    pub payload: Bytes,
    decode: Decoder<T>,
    fallback: Option<T>,
}

impl<T: Clone> CallDescriptor<T> {
    pub fn new(
        target: Address,
        payload: impl Into<Bytes>,
        decode: impl Fn(&[u8]) -> Result<T, DecodeError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            target,
            payload: payload.into(),
            decode: Arc::new(decode),
            fallback: None,
        }
    }

    /// Descriptor for a typed ABI call; `map` turns the decoded return tuple into `T`
    pub fn typed<C>(target: Address, call: C, map: impl Fn(C::Return) -> T + Send + Sync + 'static) -> Self
    where
        C: SolCall,
    {
        Self::new(target, call.abi_encode(), move |raw| {
            let decoded = C::abi_decode_returns(raw, true)?;
            Ok(map(decoded))
        })
    }

    /// Value the slot takes when the call reverts or its data cannot be decoded
    pub fn with_fallback(mut self, value: T) -> Self {
        self.fallback = Some(value);
        self
    }

    /// Turn the raw outcome of this call into a slot
    pub fn settle(&self, raw: Result<&[u8], DecodeError>) -> SlotOutcome<T> {
        let error = match raw.and_then(|bytes| (self.decode)(bytes)) {
            Ok(value) => return SlotOutcome::Decoded(value),
            Err(error) => error,
        };

        match &self.fallback {
            Some(value) => SlotOutcome::Fallback {
                value: value.clone(),
                error,
            },
            None => SlotOutcome::Failed(error),
        }
    }
}

impl<T> fmt::Debug for CallDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallDescriptor")
            .field("target", &self.target)
            .field("payload_len", &self.payload.len())
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Result of a single batch slot
#[derive(Debug, Clone, PartialEq)]
pub enum SlotOutcome<T> {
    Decoded(T),
    Fallback { value: T, error: DecodeError },
    Failed(DecodeError),
}

impl<T> SlotOutcome<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            SlotOutcome::Decoded(value) | SlotOutcome::Fallback { value, .. } => Some(value),
            SlotOutcome::Failed(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            SlotOutcome::Decoded(value) | SlotOutcome::Fallback { value, .. } => Some(value),
            SlotOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&DecodeError> {
        match self {
            SlotOutcome::Decoded(_) => None,
            SlotOutcome::Fallback { error, .. } | SlotOutcome::Failed(error) => Some(error),
        }
    }
}

/// Ordered batch output; always the same length as the descriptor list
#[derive(Debug, Clone)]
pub struct BatchResult<T> {
    pub slots: Vec<SlotOutcome<T>>,
    /// `true` when the aggregator served the batch, `false` for the per-call path
    pub aggregated: bool,
}

impl<T> BatchResult<T> {
    pub fn failures(&self) -> usize {
        self.slots.iter().filter(|s| s.error().is_some()).count()
    }

    pub fn into_values(self) -> Vec<Option<T>> {
        self.slots.into_iter().map(SlotOutcome::into_value).collect()
    }
}
