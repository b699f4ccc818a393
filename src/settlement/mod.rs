// Expiry tracking and resolution: classification, timers, chain reads and the scheduler
pub mod classifier;
pub mod events;
pub mod feed;
pub mod reader;
pub mod scheduler;
pub mod timers;

pub use events::{EventAck, LifecycleEvent, LifecycleHandler};
pub use feed::{ContractFeed, ContractMetadata};
pub use reader::ChainStateReader;
pub use scheduler::{ExpiryScheduler, SchedulerConfig, SchedulerStatus, SweepReport};
