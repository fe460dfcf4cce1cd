mod config;
mod handlers;
mod scheduler;
mod server;
mod state;
mod telegram;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::{
    SchedulerBackend, ServiceConfig, StoreBackend, DEFAULT_INBOUND_BODY_MAX_BYTES,
    DEFAULT_TIMEZONE,
};
pub use server::{build_router, run_server};
pub use state::AppState;
pub use telegram::{IgnoredUpdate, TelegramUpdate};
