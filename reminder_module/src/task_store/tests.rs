use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tempfile::TempDir;

use super::*;
use crate::kv_store::{MemoryKvStore, SqliteKvStore};

const CHAT: &str = "chat-1";

fn utc(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
}

fn store() -> TaskStore {
    TaskStore::new(Arc::new(MemoryKvStore::new()), "America/New_York".parse().unwrap())
}

fn new_task(content: &str, delay_minutes: i64) -> NewTask {
    NewTask {
        content: content.to_string(),
        is_important: false,
        delay_minutes,
        is_day_only: false,
    }
}

fn items(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|item| item.to_string()).collect()
}

#[test]
fn create_task_sets_initial_fields() {
    let store = store();
    let now = utc("2026-10-19T14:00:00Z");
    let task = store.create_task_at(CHAT, &new_task("  call mom ", 120), now).unwrap();

    assert_eq!(task.content, "call mom");
    assert_eq!(task.nagging_level, 0);
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.campaign, CampaignPhase::Scheduled);
    assert_eq!(task.next_reminder, now + Duration::minutes(120));
    assert!(task.qstash_message_id.is_none());

    let loaded = store.get_task(CHAT, &task.id).unwrap().unwrap();
    assert_eq!(loaded, task);
    assert_eq!(store.get_pending_tasks(CHAT).unwrap(), vec![task]);
}

#[test]
fn day_only_task_is_anchored_at_local_noon() {
    let store = store();
    let tz: Tz = store.timezone();
    let now = utc("2026-10-19T14:00:00Z");
    let mut request = new_task("buy stamps", 60 * 24);
    request.is_day_only = true;
    let task = store.create_task_at(CHAT, &request, now).unwrap();

    assert_eq!(task.campaign, CampaignPhase::DayOnly);
    assert!(task.qstash_message_id.is_none());
    let local = task.next_reminder.with_timezone(&tz);
    assert_eq!(local.hour(), 12);
    assert_eq!(local.format("%Y-%m-%d").to_string(), "2026-10-20");
}

#[test]
fn pending_tasks_sorted_by_next_reminder() {
    let store = store();
    let now = utc("2026-10-19T14:00:00Z");
    let later = store.create_task_at(CHAT, &new_task("water plants", 300), now).unwrap();
    let sooner = store.create_task_at(CHAT, &new_task("send invoice", 30), now).unwrap();
    let middle = store.create_task_at(CHAT, &new_task("book dentist", 90), now).unwrap();

    let ids: Vec<String> = store
        .get_pending_tasks(CHAT)
        .unwrap()
        .into_iter()
        .map(|task| task.id)
        .collect();
    assert_eq!(ids, vec![sooner.id, middle.id, later.id]);
}

#[test]
fn pending_tasks_skip_dangling_index_entries() {
    let store = store();
    let now = utc("2026-10-19T14:00:00Z");
    let kept = store.create_task_at(CHAT, &new_task("call mom", 10), now).unwrap();
    let dropped = store.create_task_at(CHAT, &new_task("pay rent", 20), now).unwrap();

    // Record removed without touching the index, as a half-applied delete would.
    store.kv.delete(&task_key(CHAT, &dropped.id)).unwrap();
    store.kv.add_to_set(&pending_index_key(CHAT), "ghost").unwrap();

    let pending = store.get_pending_tasks(CHAT).unwrap();
    assert_eq!(pending, vec![kept]);
}

#[test]
fn fuzzy_match_ignores_schedule_metadata() {
    let store = store();
    let now = utc("2026-10-19T14:00:00Z");
    let target = store
        .create_task_at(
            CHAT,
            &new_task("Lili has appointment on Tuesday @tuesday 3:00 PM (overdue)", 60),
            now,
        )
        .unwrap();
    store.create_task_at(CHAT, &new_task("renew passport", 600), now).unwrap();

    let found = store
        .find_task_by_description(CHAT, Some("Lili has appointment"))
        .unwrap()
        .unwrap();
    assert!(!found.is_fallback());
    assert_eq!(found.task().id, target.id);
}

#[test]
fn missing_query_defaults_to_latest_pending_task() {
    let store = store();
    let now = utc("2026-10-19T14:00:00Z");
    store.create_task_at(CHAT, &new_task("call mom", 30), now).unwrap();
    let latest = store.create_task_at(CHAT, &new_task("renew passport", 600), now).unwrap();
    store.create_task_at(CHAT, &new_task("feed cat", 90), now).unwrap();

    let found = store.find_task_by_description(CHAT, None).unwrap().unwrap();
    assert_eq!(found.task().id, latest.id);

    let unmatched = store
        .find_task_by_description(CHAT, Some("something unrelated"))
        .unwrap()
        .unwrap();
    assert!(unmatched.is_fallback());
    assert_eq!(unmatched.into_task().id, latest.id);
}

#[test]
fn no_pending_tasks_means_no_match() {
    let store = store();
    assert!(store.find_task_by_description(CHAT, Some("anything")).unwrap().is_none());
    assert!(store.find_task_by_description(CHAT, None).unwrap().is_none());
}

#[test]
fn multi_description_lookup_is_deduplicated_union() {
    let store = store();
    let now = utc("2026-10-19T14:00:00Z");
    let mom = store.create_task_at(CHAT, &new_task("call mom", 30), now).unwrap();
    let rent = store.create_task_at(CHAT, &new_task("pay rent", 60), now).unwrap();
    store.create_task_at(CHAT, &new_task("feed cat", 90), now).unwrap();

    let hits = store
        .find_tasks_by_descriptions(
            CHAT,
            &items(&["Call Mom", "call mom today", "rent", "walk the dog"]),
        )
        .unwrap();
    let ids: Vec<&str> = hits.iter().map(|task| task.id.as_str()).collect();
    assert_eq!(ids, vec![mom.id.as_str(), rent.id.as_str()]);
}

#[test]
fn overdue_and_today_queries() {
    let store = store();
    let created = utc("2026-10-18T14:00:00Z");
    // 2026-10-19 in New York runs from 04:00Z to 04:00Z next day.
    let overdue = store.create_task_at(CHAT, &new_task("pay rent", 60), created).unwrap();
    let due_today = store
        .create_task_at(CHAT, &new_task("call mom", 60 * 24 + 180), created)
        .unwrap();
    store
        .create_task_at(CHAT, &new_task("renew passport", 60 * 24 * 3), created)
        .unwrap();
    let mut day_only = new_task("buy stamps", 60 * 24);
    day_only.is_day_only = true;
    let day_only = store.create_task_at(CHAT, &day_only, created).unwrap();

    let now = utc("2026-10-19T15:00:00Z");
    let overdue_ids: Vec<String> = store
        .get_overdue_tasks_at(CHAT, now)
        .unwrap()
        .into_iter()
        .map(|task| task.id)
        .collect();
    assert_eq!(overdue_ids, vec![overdue.id.clone()]);

    let today_ids: Vec<String> = store
        .get_todays_tasks_at(CHAT, now)
        .unwrap()
        .into_iter()
        .map(|task| task.id)
        .collect();
    assert_eq!(today_ids, vec![day_only.id, due_today.id]);
}

#[test]
fn completing_bumps_day_counter_once() {
    let store = store();
    let now = utc("2026-10-19T15:00:00Z");
    let task = store.create_task_at(CHAT, &new_task("call mom", 10), now).unwrap();

    let done = store.complete_task_at(CHAT, &task.id, now).unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.campaign, CampaignPhase::Closed);
    assert_eq!(done.completed_at, Some(now));
    assert!(store.get_pending_tasks(CHAT).unwrap().is_empty());

    // A second completion of an already-completed task does not count twice.
    store.complete_task_at(CHAT, &task.id, now).unwrap();
    assert_eq!(store.completions_on(CHAT, "2026-10-19").unwrap(), 1);
    assert_eq!(store.completions_on(CHAT, "2026-10-18").unwrap(), 0);
}

#[test]
fn completing_missing_task_returns_none() {
    let store = store();
    assert!(store.complete_task(CHAT, "nope").unwrap().is_none());
}

#[test]
fn completing_task_completes_linked_list_only_one_way() {
    let store = store();
    let now = utc("2026-10-19T15:00:00Z");
    let task = store.create_task_at(CHAT, &new_task("grocery run", 60), now).unwrap();
    let list = store
        .create_list_at(CHAT, "Groceries", &items(&["milk", "eggs"]), Some(&task.id), now)
        .unwrap();
    assert_eq!(list.linked_task_id.as_deref(), Some(task.id.as_str()));
    let linked = store.get_task(CHAT, &task.id).unwrap().unwrap();
    assert_eq!(linked.linked_list_id.as_deref(), Some(list.id.as_str()));

    store.complete_task_at(CHAT, &task.id, now).unwrap();
    let list = store.get_list(CHAT, &list.id).unwrap().unwrap();
    assert_eq!(list.status, ListStatus::Completed);

    // The reverse direction never completes a task.
    let other = store.create_task_at(CHAT, &new_task("pack bags", 60), now).unwrap();
    let other_list = store
        .create_list_at(CHAT, "Packing", &items(&["socks"]), Some(&other.id), now)
        .unwrap();
    store.complete_list(CHAT, &other_list.id).unwrap();
    assert!(store.get_task(CHAT, &other.id).unwrap().unwrap().is_pending());
}

#[test]
fn deleting_task_unlinks_list() {
    let store = store();
    let now = utc("2026-10-19T15:00:00Z");
    let task = store.create_task_at(CHAT, &new_task("grocery run", 60), now).unwrap();
    let list = store
        .create_list_at(CHAT, "Groceries", &items(&["milk"]), Some(&task.id), now)
        .unwrap();

    let deleted = store.delete_task(CHAT, &task.id).unwrap();
    assert_eq!(deleted.map(|task| task.id), Some(task.id.clone()));
    assert!(store.get_task(CHAT, &task.id).unwrap().is_none());
    assert!(store.get_pending_tasks(CHAT).unwrap().is_empty());

    let list = store.get_list(CHAT, &list.id).unwrap().unwrap();
    assert_eq!(list.status, ListStatus::Active);
    assert!(list.linked_task_id.is_none());
}

#[test]
fn deleting_list_clears_task_back_reference() {
    let store = store();
    let now = utc("2026-10-19T15:00:00Z");
    let task = store.create_task_at(CHAT, &new_task("grocery run", 60), now).unwrap();
    let list = store
        .create_list_at(CHAT, "Groceries", &items(&["milk"]), Some(&task.id), now)
        .unwrap();

    store.delete_list(CHAT, &list.id).unwrap();
    assert!(store.get_list(CHAT, &list.id).unwrap().is_none());
    assert!(store.get_lists(CHAT).unwrap().is_empty());
    let task = store.get_task(CHAT, &task.id).unwrap().unwrap();
    assert!(task.linked_list_id.is_none());
    assert!(task.is_pending());
}

#[test]
fn relinking_task_clears_previous_list_link() {
    let store = store();
    let now = utc("2026-10-19T15:00:00Z");
    let task = store.create_task_at(CHAT, &new_task("party prep", 60), now).unwrap();
    let first = store.create_list_at(CHAT, "Snacks", &[], Some(&task.id), now).unwrap();
    let second = store
        .create_list_at(CHAT, "Decorations", &[], Some(&task.id), now + Duration::seconds(1))
        .unwrap();

    assert!(store.get_list(CHAT, &first.id).unwrap().unwrap().linked_task_id.is_none());
    let task = store.get_task(CHAT, &task.id).unwrap().unwrap();
    assert_eq!(task.linked_list_id.as_deref(), Some(second.id.as_str()));
}

#[test]
fn list_item_edits_use_fuzzy_matching() {
    let store = store();
    let list = store
        .create_list(CHAT, "Groceries", &items(&["Whole milk", "eggs", "  ", "Bread (sourdough)"]), None)
        .unwrap();
    assert_eq!(list.items.len(), 3);

    let edit = store
        .check_list_items(CHAT, &list.id, &items(&["milk", "bread"]))
        .unwrap()
        .unwrap();
    assert_eq!(edit.affected, vec!["Whole milk", "Bread (sourdough)"]);
    assert_eq!(edit.list.unchecked_items().count(), 1);

    let edit = store
        .uncheck_list_items(CHAT, &list.id, &items(&["MILK"]))
        .unwrap()
        .unwrap();
    assert_eq!(edit.affected, vec!["Whole milk"]);

    let edit = store
        .remove_list_items(CHAT, &list.id, &items(&["eggs", "caviar"]))
        .unwrap()
        .unwrap();
    assert_eq!(edit.affected, vec!["eggs"]);
    assert_eq!(edit.list.items.len(), 2);

    let grown = store
        .add_list_items(CHAT, &list.id, &items(&["butter"]))
        .unwrap()
        .unwrap();
    assert_eq!(grown.items.last().map(|item| item.content.as_str()), Some("butter"));
    assert!(store.add_list_items(CHAT, "missing", &items(&["x"])).unwrap().is_none());
}

#[test]
fn list_lookup_matches_name_or_falls_back_to_latest_active() {
    let store = store();
    let now = utc("2026-10-19T15:00:00Z");
    let groceries = store.create_list_at(CHAT, "Groceries", &[], None, now).unwrap();
    let packing = store
        .create_list_at(CHAT, "Packing list", &[], None, now + Duration::seconds(1))
        .unwrap();

    let found = store.find_list_by_description(CHAT, Some("groceries")).unwrap().unwrap();
    assert_eq!(found.id, groceries.id);
    let fallback = store.find_list_by_description(CHAT, Some("zzz")).unwrap().unwrap();
    assert_eq!(fallback.id, packing.id);

    store.complete_list(CHAT, &packing.id).unwrap();
    let fallback = store.find_list_by_description(CHAT, None).unwrap().unwrap();
    assert_eq!(fallback.id, groceries.id);

    let renamed = store.rename_list(CHAT, &groceries.id, " Food ").unwrap().unwrap();
    assert_eq!(renamed.name, "Food");
}

#[test]
fn inbox_is_created_once() {
    let store = store();
    let first = store.inbox(CHAT).unwrap();
    assert_eq!(first.name, "Inbox");
    let second = store.inbox(CHAT).unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(store.get_lists(CHAT).unwrap().len(), 1);
}

#[test]
fn sqlite_backed_store_round_trips_tasks() {
    let dir = TempDir::new().unwrap();
    let kv = SqliteKvStore::new(dir.path().join("store.db")).unwrap();
    let store = TaskStore::new(Arc::new(kv), "UTC".parse().unwrap());
    let task = store.create_task(CHAT, &new_task("call mom", 15)).unwrap();
    let found = store.find_task_by_description(CHAT, Some("mom")).unwrap().unwrap();
    assert_eq!(found.task().id, task.id);
}
