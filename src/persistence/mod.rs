// ABOUTME: Persistence module: record shapes, storage gateways, and the background write queue.
// ABOUTME: Everything here runs off the turn path; the dialogue core only ever submits jobs.

pub mod gateway;
pub mod jsonl;
pub mod queue;
pub mod record;

pub use gateway::{MemoryGateway, PersistenceGateway};
pub use jsonl::JsonlGateway;
pub use queue::{PersistenceJob, PersistenceQueue, QueueSettings};
pub use record::{AudioAttachment, MessageRecord};
