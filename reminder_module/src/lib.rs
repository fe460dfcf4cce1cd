//! Reminder and nagging assistant: tasks with escalating reminder campaigns,
//! recurring check-ins and digests, driven by scheduler callbacks and chat
//! messages.

pub mod assistant;
pub mod campaign;
pub mod composer;
pub mod coordinator;
pub mod gateway;
pub mod intent;
pub mod kv_store;
pub mod llm;
pub mod service;
pub mod task_store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod time_normalizer;
pub mod transcription;
pub mod transport;

pub use assistant::{Assistant, AssistantError, DispatchOutcome, InboundContent, InboundMessage};
pub use campaign::{CallbackOutcome, CampaignEngine, CampaignError, SkipReason};
pub use coordinator::{PreferenceCoordinator, UserPreferences};
pub use gateway::{CallbackKind, CallbackPayload, SchedulingGateway};
pub use kv_store::{KvStore, MemoryKvStore, SqliteKvStore, StoreError};
pub use task_store::{CampaignPhase, NewTask, Task, TaskStatus, TaskStore};
