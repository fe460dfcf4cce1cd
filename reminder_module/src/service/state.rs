use std::sync::Arc;

use tracing::{info, warn};

use crate::assistant::Assistant;
use crate::campaign::CampaignEngine;
use crate::composer::{MessageComposer, OpenAiComposer, TemplateComposer};
use crate::coordinator::PreferenceCoordinator;
use crate::gateway::{DelayedDelivery, LocalScheduler, QstashClient, SchedulingGateway, SigningKeys};
use crate::intent::OpenAiIntentClassifier;
use crate::kv_store::{KvStore, MemoryKvStore, SqliteKvStore};
use crate::llm::{ChatClient, LlmConfig};
use crate::task_store::TaskStore;
use crate::transcription::WhisperTranscriber;
use crate::transport::{MessageTransport, TelegramTransport};

use super::config::{SchedulerBackend, ServiceConfig, StoreBackend};
use super::BoxError;

/// Shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub(super) assistant: Arc<Assistant>,
    pub(super) gateway: Arc<SchedulingGateway>,
    pub(super) telegram_webhook_secret: Option<String>,
}

impl AppState {
    pub fn new(
        assistant: Arc<Assistant>,
        gateway: Arc<SchedulingGateway>,
        telegram_webhook_secret: Option<String>,
    ) -> Self {
        Self {
            assistant,
            gateway,
            telegram_webhook_secret,
        }
    }
}

pub(super) struct Backends {
    pub(super) state: AppState,
    /// Present when deliveries are polled in-process instead of pushed by QStash.
    pub(super) local_scheduler: Option<Arc<LocalScheduler>>,
}

/// Wires the store, gateway, collaborators and engines from configuration.
/// Builds blocking HTTP clients, so call it off the async runtime.
pub(super) fn build_backends(config: &ServiceConfig) -> Result<Backends, BoxError> {
    let kv: Arc<dyn KvStore> = match &config.store_backend {
        StoreBackend::Sqlite(path) => {
            info!("key-value store at {}", path.display());
            Arc::new(SqliteKvStore::new(path.clone())?)
        }
        StoreBackend::Memory => {
            warn!("using in-memory store; state is lost on restart");
            Arc::new(MemoryKvStore::new())
        }
    };

    let mut local_scheduler = None;
    let delivery: Arc<dyn DelayedDelivery> = match config.scheduler_backend {
        SchedulerBackend::Qstash => {
            let token = config.qstash_token.clone().ok_or("missing QSTASH_TOKEN")?;
            let callback_url = config.callback_url.clone().ok_or("missing CALLBACK_URL")?;
            info!("delayed delivery via QStash, callbacks to {}", callback_url);
            Arc::new(QstashClient::new(&config.qstash_url, token, callback_url)?)
        }
        SchedulerBackend::Local => {
            info!(
                "delayed delivery via local scheduler at {}",
                config.local_scheduler_db_path.display()
            );
            let scheduler = Arc::new(LocalScheduler::new(config.local_scheduler_db_path.clone())?);
            local_scheduler = Some(scheduler.clone());
            scheduler
        }
    };

    let signing_keys = SigningKeys::new(
        config.qstash_current_signing_key.clone(),
        config.qstash_next_signing_key.clone(),
    )
    .with_subject(config.callback_url.clone());
    if config.scheduler_backend == SchedulerBackend::Qstash && !signing_keys.is_configured() {
        warn!("QStash signing keys not set; callback signatures are not verified");
    }
    let gateway = Arc::new(SchedulingGateway::new(delivery, config.timezone, signing_keys));

    let transport: Arc<dyn MessageTransport> = Arc::new(TelegramTransport::new(
        config.telegram_bot_token.clone().unwrap_or_default(),
        config.telegram_api_base.clone(),
    ));
    if config.telegram_bot_token.is_none() {
        warn!("TELEGRAM_BOT_TOKEN not set; outbound messages will fail");
    }

    let llm = |model: &str| LlmConfig {
        api_key: config.openai_api_key.clone(),
        api_url: config.openai_api_url.clone(),
        model: model.to_string(),
        timeout: config.llm_timeout,
    };
    let assistant_llm = llm(&config.assistant_model);
    let composer: Arc<dyn MessageComposer> = if assistant_llm.is_configured() {
        Arc::new(OpenAiComposer::new(ChatClient::new(assistant_llm.clone())?))
    } else {
        warn!("OPENAI_API_KEY not set; replies use fallback templates");
        Arc::new(TemplateComposer)
    };
    let classifier = Arc::new(OpenAiIntentClassifier::new(
        ChatClient::new(assistant_llm)?,
        config.timezone,
    ));
    let transcriber = Arc::new(WhisperTranscriber::new(
        ChatClient::new(llm(&config.transcription_model))?,
        config.transcription_model.clone(),
    ));

    let tasks = Arc::new(TaskStore::new(kv.clone(), config.timezone));
    let campaign = Arc::new(CampaignEngine::new(
        tasks.clone(),
        kv.clone(),
        gateway.clone(),
        transport.clone(),
        composer.clone(),
    ));
    let coordinator = Arc::new(PreferenceCoordinator::new(
        kv.clone(),
        tasks,
        gateway.clone(),
        transport.clone(),
        composer.clone(),
    ));
    let assistant = Arc::new(
        Assistant::new(kv, campaign, coordinator, classifier, composer, transport)
            .with_transcriber(transcriber),
    );

    Ok(Backends {
        state: AppState::new(assistant, gateway, config.telegram_webhook_secret.clone()),
        local_scheduler,
    })
}
