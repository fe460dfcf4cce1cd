use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::kv_store::{get_json, set_json, StoreError};

use super::matching::{normalize_description, normalized_match};
use super::types::{ListEdit, ListItem, ListStatus, TaskList};
use super::TaskStore;

pub const INBOX_LIST_NAME: &str = "Inbox";

pub(crate) fn list_key(chat_id: &str, list_id: &str) -> String {
    format!("list:{}:{}", chat_id, list_id)
}

pub(crate) fn list_index_key(chat_id: &str) -> String {
    format!("lists:{}", chat_id)
}

fn new_items(contents: &[String], now: DateTime<Utc>) -> Vec<ListItem> {
    contents
        .iter()
        .map(|content| content.trim())
        .filter(|content| !content.is_empty())
        .map(|content| ListItem {
            id: Uuid::new_v4().to_string(),
            content: content.to_string(),
            is_checked: false,
            created_at: now,
        })
        .collect()
}

impl TaskStore {
    pub fn create_list(
        &self,
        chat_id: &str,
        name: &str,
        items: &[String],
        linked_task_id: Option<&str>,
    ) -> Result<TaskList, StoreError> {
        self.create_list_at(chat_id, name, items, linked_task_id, Utc::now())
    }

    pub fn create_list_at(
        &self,
        chat_id: &str,
        name: &str,
        items: &[String],
        linked_task_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TaskList, StoreError> {
        let mut list = TaskList {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            name: name.trim().to_string(),
            items: new_items(items, now),
            status: ListStatus::Active,
            linked_task_id: None,
            created_at: now,
        };

        if let Some(task_id) = linked_task_id {
            if let Some(mut task) = self.get_task(chat_id, task_id)? {
                if let Some(previous) = task.linked_list_id.take() {
                    self.clear_list_link(chat_id, &previous, task_id)?;
                }
                task.linked_list_id = Some(list.id.clone());
                self.save_task(&task)?;
                list.linked_task_id = Some(task_id.to_string());
            } else {
                debug!("not linking list to missing task {}", task_id);
            }
        }

        self.save_list(&list)?;
        self.kv.add_to_set(&list_index_key(chat_id), &list.id)?;
        Ok(list)
    }

    pub fn get_list(&self, chat_id: &str, list_id: &str) -> Result<Option<TaskList>, StoreError> {
        get_json(self.kv.as_ref(), &list_key(chat_id, list_id))
    }

    pub fn save_list(&self, list: &TaskList) -> Result<(), StoreError> {
        set_json(self.kv.as_ref(), &list_key(&list.chat_id, &list.id), list, None)
    }

    /// All lists of a chat, oldest first; dangling index entries are skipped.
    pub fn get_lists(&self, chat_id: &str) -> Result<Vec<TaskList>, StoreError> {
        let mut lists = Vec::new();
        for id in self.kv.set_members(&list_index_key(chat_id))? {
            match self.get_list(chat_id, &id)? {
                Some(list) => lists.push(list),
                None => debug!("list index holds missing list {}", id),
            }
        }
        lists.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(lists)
    }

    /// Same convention as task lookup: match on the normalized name, else fall
    /// back to the most recently created active list.
    pub fn find_list_by_description(
        &self,
        chat_id: &str,
        description: Option<&str>,
    ) -> Result<Option<TaskList>, StoreError> {
        let active: Vec<TaskList> = self
            .get_lists(chat_id)?
            .into_iter()
            .filter(|list| list.status == ListStatus::Active)
            .collect();
        let query = description.map(normalize_description).unwrap_or_default();
        if !query.is_empty() {
            if let Some(list) = active
                .iter()
                .rev()
                .find(|list| normalized_match(&query, &normalize_description(&list.name)))
            {
                return Ok(Some(list.clone()));
            }
        }
        Ok(active.into_iter().last())
    }

    /// The chat's Inbox list, created on first use.
    pub fn inbox(&self, chat_id: &str) -> Result<TaskList, StoreError> {
        let existing = self
            .get_lists(chat_id)?
            .into_iter()
            .find(|list| list.name.eq_ignore_ascii_case(INBOX_LIST_NAME));
        match existing {
            Some(list) => Ok(list),
            None => self.create_list(chat_id, INBOX_LIST_NAME, &[], None),
        }
    }

    pub fn add_list_items(
        &self,
        chat_id: &str,
        list_id: &str,
        items: &[String],
    ) -> Result<Option<TaskList>, StoreError> {
        let Some(mut list) = self.get_list(chat_id, list_id)? else {
            return Ok(None);
        };
        list.items.extend(new_items(items, Utc::now()));
        self.save_list(&list)?;
        Ok(Some(list))
    }

    pub fn remove_list_items(
        &self,
        chat_id: &str,
        list_id: &str,
        descriptions: &[String],
    ) -> Result<Option<ListEdit>, StoreError> {
        let Some(mut list) = self.get_list(chat_id, list_id)? else {
            return Ok(None);
        };
        let queries = normalized_queries(descriptions);
        let mut affected = Vec::new();
        list.items.retain(|item| {
            let hit = item_matches(&queries, &item.content);
            if hit {
                affected.push(item.content.clone());
            }
            !hit
        });
        self.save_list(&list)?;
        Ok(Some(ListEdit { list, affected }))
    }

    pub fn check_list_items(
        &self,
        chat_id: &str,
        list_id: &str,
        descriptions: &[String],
    ) -> Result<Option<ListEdit>, StoreError> {
        self.set_items_checked(chat_id, list_id, descriptions, true)
    }

    pub fn uncheck_list_items(
        &self,
        chat_id: &str,
        list_id: &str,
        descriptions: &[String],
    ) -> Result<Option<ListEdit>, StoreError> {
        self.set_items_checked(chat_id, list_id, descriptions, false)
    }

    fn set_items_checked(
        &self,
        chat_id: &str,
        list_id: &str,
        descriptions: &[String],
        checked: bool,
    ) -> Result<Option<ListEdit>, StoreError> {
        let Some(mut list) = self.get_list(chat_id, list_id)? else {
            return Ok(None);
        };
        let queries = normalized_queries(descriptions);
        let mut affected = Vec::new();
        for item in list.items.iter_mut() {
            if item.is_checked != checked && item_matches(&queries, &item.content) {
                item.is_checked = checked;
                affected.push(item.content.clone());
            }
        }
        self.save_list(&list)?;
        Ok(Some(ListEdit { list, affected }))
    }

    pub fn rename_list(
        &self,
        chat_id: &str,
        list_id: &str,
        new_name: &str,
    ) -> Result<Option<TaskList>, StoreError> {
        let Some(mut list) = self.get_list(chat_id, list_id)? else {
            return Ok(None);
        };
        list.name = new_name.trim().to_string();
        self.save_list(&list)?;
        Ok(Some(list))
    }

    /// Completing a list never touches its linked task.
    pub fn complete_list(
        &self,
        chat_id: &str,
        list_id: &str,
    ) -> Result<Option<TaskList>, StoreError> {
        let Some(mut list) = self.get_list(chat_id, list_id)? else {
            return Ok(None);
        };
        list.status = ListStatus::Completed;
        self.save_list(&list)?;
        Ok(Some(list))
    }

    /// Deletes the list and clears the linked task's back-reference.
    pub fn delete_list(
        &self,
        chat_id: &str,
        list_id: &str,
    ) -> Result<Option<TaskList>, StoreError> {
        let existing = self.get_list(chat_id, list_id)?;
        if let Some(task_id) = existing.as_ref().and_then(|list| list.linked_task_id.as_deref()) {
            if let Some(mut task) = self.get_task(chat_id, task_id)? {
                if task.linked_list_id.as_deref() == Some(list_id) {
                    task.linked_list_id = None;
                    self.save_task(&task)?;
                }
            }
        }
        self.kv.delete(&list_key(chat_id, list_id))?;
        self.kv.remove_from_set(&list_index_key(chat_id), list_id)?;
        Ok(existing)
    }

    pub(crate) fn clear_list_link(
        &self,
        chat_id: &str,
        list_id: &str,
        task_id: &str,
    ) -> Result<(), StoreError> {
        if let Some(mut list) = self.get_list(chat_id, list_id)? {
            if list.linked_task_id.as_deref() == Some(task_id) {
                list.linked_task_id = None;
                self.save_list(&list)?;
            }
        }
        Ok(())
    }
}

fn normalized_queries(descriptions: &[String]) -> Vec<String> {
    descriptions
        .iter()
        .map(|description| normalize_description(description))
        .filter(|query| !query.is_empty())
        .collect()
}

fn item_matches(queries: &[String], content: &str) -> bool {
    let content = normalize_description(content);
    queries.iter().any(|query| normalized_match(query, &content))
}
