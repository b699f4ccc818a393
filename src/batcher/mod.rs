// Read aggregation: many contract reads, one network round trip
pub mod call;
pub mod multicall;

pub use call::{CallDescriptor, SlotOutcome};
pub use multicall::{BatcherConfig, CallBatcher};
