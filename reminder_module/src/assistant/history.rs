use std::time::Duration;

use crate::intent::HistoryEntry;
use crate::kv_store::{get_json, set_json, KvStore, StoreError};

/// Turns kept for classifier context.
pub const HISTORY_LIMIT: usize = 10;
pub const HISTORY_TTL: Duration = Duration::from_secs(24 * 3600);

fn history_key(chat_id: &str) -> String {
    format!("history:{}", chat_id)
}

pub(super) fn load(store: &dyn KvStore, chat_id: &str) -> Result<Vec<HistoryEntry>, StoreError> {
    Ok(get_json(store, &history_key(chat_id))?.unwrap_or_default())
}

pub(super) fn append(
    store: &dyn KvStore,
    chat_id: &str,
    mut history: Vec<HistoryEntry>,
    user_text: &str,
    reply: &str,
) -> Result<(), StoreError> {
    history.push(HistoryEntry {
        role: "user".to_string(),
        content: user_text.to_string(),
    });
    history.push(HistoryEntry {
        role: "assistant".to_string(),
        content: reply.to_string(),
    });
    let overflow = history.len().saturating_sub(HISTORY_LIMIT);
    history.drain(..overflow);
    set_json(store, &history_key(chat_id), &history, Some(HISTORY_TTL))
}
