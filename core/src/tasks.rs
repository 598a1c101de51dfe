use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;
use store_api::{DocRef, DocUpdate, Document, DocumentStore, FieldUpdate, Filter, Query, StoreResult};
use time::OffsetDateTime;
use tracing::debug;

use crate::collections::{self, fields, timestamp};
use crate::config::SweeperConfig;
use crate::error::{SweepError, SweepResult};
use crate::report::TaskProgress;

/// Tasks making up a full sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum TaskKind {
    /// Chat messages whose `expiresAt` has passed.
    ExpiredMessages,
    /// Approval requests whose `expiresAt` has passed.
    ExpiredApprovals,
    /// Notifications older than the notification window.
    OldNotifications,
    /// Chat participants whose chat room is gone.
    OrphanedParticipants,
    /// Event comments whose event is gone.
    OrphanedEventComments,
    /// User/event interactions whose event is gone.
    OrphanedInteractions,
    /// Presence records not refreshed within the presence window.
    StalePresence,
    /// Pinned message ids on clubs that point at deleted messages.
    PinnedMessages,
    /// Media attachments without a url on older messages.
    InvalidMedia,
    /// Reactions on messages older than the reaction window.
    OldReactions,
}

impl TaskKind {
    pub const ALL: [TaskKind; 10] = [
        TaskKind::ExpiredMessages,
        TaskKind::ExpiredApprovals,
        TaskKind::OldNotifications,
        TaskKind::OrphanedParticipants,
        TaskKind::OrphanedEventComments,
        TaskKind::OrphanedInteractions,
        TaskKind::StalePresence,
        TaskKind::PinnedMessages,
        TaskKind::InvalidMedia,
        TaskKind::OldReactions,
    ];

    /// Tasks whose eligible set can be counted without mutating anything.
    pub const AGE_BASED: [TaskKind; 5] = [
        TaskKind::ExpiredMessages,
        TaskKind::ExpiredApprovals,
        TaskKind::OldNotifications,
        TaskKind::StalePresence,
        TaskKind::OldReactions,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TaskKind::ExpiredMessages => "expired_messages",
            TaskKind::ExpiredApprovals => "expired_approvals",
            TaskKind::OldNotifications => "old_notifications",
            TaskKind::OrphanedParticipants => "orphaned_participants",
            TaskKind::OrphanedEventComments => "orphaned_event_comments",
            TaskKind::OrphanedInteractions => "orphaned_interactions",
            TaskKind::StalePresence => "stale_presence",
            TaskKind::PinnedMessages => "pinned_messages",
            TaskKind::InvalidMedia => "invalid_media",
            TaskKind::OldReactions => "old_reactions",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Deletions scoped to one club, independent of age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClubTask {
    Messages,
    Approvals,
    Participants,
}

impl ClubTask {
    pub const ALL: [ClubTask; 3] = [ClubTask::Messages, ClubTask::Approvals, ClubTask::Participants];

    pub fn name(self) -> &'static str {
        match self {
            ClubTask::Messages => "club_messages",
            ClubTask::Approvals => "club_approvals",
            ClubTask::Participants => "club_participants",
        }
    }

    fn collection(self) -> &'static str {
        match self {
            ClubTask::Messages => collections::CHAT_MESSAGES,
            ClubTask::Approvals => collections::APPROVAL_REQUESTS,
            ClubTask::Participants => collections::CHAT_PARTICIPANTS,
        }
    }
}

/// Selector of the documents an age-based task would act on at `now`.
/// Shared by the tasks and by statistics so both agree exactly.
pub fn eligible_query(
    kind: TaskKind,
    config: &SweeperConfig,
    now: OffsetDateTime,
) -> SweepResult<Option<Query>> {
    let retention = &config.retention;
    let query = match kind {
        TaskKind::ExpiredMessages => Query::collection(collections::CHAT_MESSAGES)
            .filter(Filter::less_than(fields::EXPIRES_AT, timestamp(now))),
        TaskKind::ExpiredApprovals => Query::collection(collections::APPROVAL_REQUESTS)
            .filter(Filter::less_than(fields::EXPIRES_AT, timestamp(now))),
        TaskKind::OldNotifications => Query::collection(collections::NOTIFICATIONS).filter(
            Filter::less_than(fields::CREATED_AT, cutoff(now, retention.notifications)?),
        ),
        TaskKind::StalePresence => Query::collection(collections::USER_PRESENCE).filter(
            Filter::less_than(fields::LAST_SEEN, cutoff(now, retention.presence)?),
        ),
        TaskKind::OldReactions => Query::collection(collections::CHAT_MESSAGES)
            .filter(Filter::less_than(
                fields::CREATED_AT,
                cutoff(now, retention.reactions)?,
            ))
            .filter(Filter::not_null(fields::REACTIONS)),
        _ => return Ok(None),
    };
    Ok(Some(query))
}

/// Stored timestamp `window` before `now`.
fn cutoff(now: OffsetDateTime, window: Duration) -> SweepResult<Value> {
    time::Duration::try_from(window)
        .ok()
        .and_then(|window| now.checked_sub(window))
        .map(timestamp)
        .ok_or(SweepError::InvalidWindow(window))
}

/// One task invocation against the store, evaluated at a fixed instant.
///
/// Deleting tasks repeat `query → batch delete → pause` until a query comes
/// back empty. Tasks that rewrite or inspect documents page through their
/// collection with an id cursor and commit one batch per page. Every store
/// call runs under the configured deadline.
///
/// Reaction and media cleanup skip messages that have already expired: those
/// belong to `expired_messages`, which deletes them in the same sweep.
pub struct TaskRunner<'a> {
    store: &'a dyn DocumentStore,
    config: &'a SweeperConfig,
    now: OffsetDateTime,
}

impl<'a> TaskRunner<'a> {
    pub fn new(store: &'a dyn DocumentStore, config: &'a SweeperConfig, now: OffsetDateTime) -> Self {
        Self { store, config, now }
    }

    /// Run a sweep task, recording committed batches into `progress`.
    pub async fn run(&self, kind: TaskKind, progress: &mut TaskProgress) -> SweepResult<()> {
        match kind {
            TaskKind::ExpiredMessages
            | TaskKind::ExpiredApprovals
            | TaskKind::OldNotifications
            | TaskKind::StalePresence
            | TaskKind::OldReactions => match eligible_query(kind, self.config, self.now)? {
                Some(query) if kind == TaskKind::OldReactions => {
                    self.clear_reactions(query, progress).await
                }
                Some(query) => self.delete_matching(query, true, progress).await,
                None => Ok(()),
            },
            TaskKind::OrphanedParticipants => {
                self.delete_orphans(
                    collections::CHAT_PARTICIPANTS,
                    fields::CHAT_ROOM_ID,
                    collections::CHAT_ROOMS,
                    progress,
                )
                .await
            }
            TaskKind::OrphanedEventComments => {
                self.delete_orphans(
                    collections::EVENT_COMMENTS,
                    fields::EVENT_ID,
                    collections::EVENTS,
                    progress,
                )
                .await
            }
            TaskKind::OrphanedInteractions => {
                self.delete_orphans(
                    collections::USER_EVENT_INTERACTIONS,
                    fields::EVENT_ID,
                    collections::EVENTS,
                    progress,
                )
                .await
            }
            TaskKind::PinnedMessages => self.prune_pinned_messages(progress).await,
            TaskKind::InvalidMedia => self.prune_media(progress).await,
        }
    }

    /// How many documents `kind` would clean right now. `None` for tasks
    /// that are not age based.
    pub async fn count_eligible(&self, kind: TaskKind) -> SweepResult<Option<u64>> {
        let Some(query) = eligible_query(kind, self.config, self.now)? else {
            return Ok(None);
        };
        if kind != TaskKind::OldReactions {
            return self.call(self.store.count(&query)).await.map(Some);
        }
        let expired = self.expired();
        let mut cursor = None;
        let mut total = 0;
        while let Some(page) = self.next_page(&query, &mut cursor).await? {
            total += page.iter().filter(|m| !expired.matches(m)).count() as u64;
            if page.len() < self.config.batch_size {
                break;
            }
        }
        Ok(Some(total))
    }

    /// Delete every document of the task's collection belonging to `club_id`.
    pub async fn run_club(
        &self,
        task: ClubTask,
        club_id: &str,
        progress: &mut TaskProgress,
    ) -> SweepResult<()> {
        let query = Query::collection(task.collection()).filter(Filter::equals(fields::CLUB_ID, club_id));
        self.delete_matching(query, false, progress).await
    }

    /// Messages `expired_messages` deletes at this instant.
    fn expired(&self) -> Filter {
        Filter::less_than(fields::EXPIRES_AT, timestamp(self.now))
    }

    async fn call<T>(&self, op: impl Future<Output = StoreResult<T>>) -> SweepResult<T> {
        match tokio::time::timeout(self.config.store_timeout, op).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SweepError::Timeout(self.config.store_timeout)),
        }
    }

    async fn pause(&self) {
        if !self.config.batch_delay.is_zero() {
            tokio::time::sleep(self.config.batch_delay).await;
        }
    }

    async fn delete_matching(
        &self,
        query: Query,
        throttle: bool,
        progress: &mut TaskProgress,
    ) -> SweepResult<()> {
        let query = query.limit(self.config.batch_size);
        loop {
            let docs = self.call(self.store.query(&query)).await?;
            if docs.is_empty() {
                return Ok(());
            }
            let refs: Vec<DocRef> = docs.iter().map(|d| d.reference(&query.collection)).collect();
            self.call(self.store.batch_delete(&refs)).await?;
            progress.record_batch(refs.len());
            debug!(collection = %query.collection, deleted = refs.len(), "deleted batch");
            if throttle {
                self.pause().await;
            }
        }
    }

    async fn clear_reactions(&self, query: Query, progress: &mut TaskProgress) -> SweepResult<()> {
        let expired = self.expired();
        let mut cursor = None;
        while let Some(page) = self.next_page(&query, &mut cursor).await? {
            let updates: Vec<DocUpdate> = page
                .iter()
                .filter(|m| !expired.matches(m))
                .map(|m| {
                    DocUpdate::new(
                        m.reference(collections::CHAT_MESSAGES),
                        vec![FieldUpdate::delete(fields::REACTIONS)],
                    )
                })
                .collect();
            if !updates.is_empty() {
                self.call(self.store.batch_update(&updates)).await?;
                progress.record_batch(updates.len());
                debug!(cleared = updates.len(), "cleared reactions");
            }
            if page.len() < self.config.batch_size {
                break;
            }
            self.pause().await;
        }
        Ok(())
    }

    /// Next page of a cursor scan. `None` once the collection is exhausted.
    async fn next_page(&self, base: &Query, cursor: &mut Option<String>) -> SweepResult<Option<Vec<Document>>> {
        let query = base
            .clone()
            .limit(self.config.batch_size)
            .start_after(cursor.clone());
        let page = self.call(self.store.query(&query)).await?;
        match page.last() {
            Some(last) => {
                *cursor = Some(last.id.clone());
                Ok(Some(page))
            }
            None => Ok(None),
        }
    }

    async fn exists(
        &self,
        collection: &str,
        id: &str,
        known: &mut HashMap<String, bool>,
    ) -> SweepResult<bool> {
        if let Some(&hit) = known.get(id) {
            return Ok(hit);
        }
        let found = self.call(self.store.get(collection, id)).await?.is_some();
        known.insert(id.to_string(), found);
        Ok(found)
    }

    async fn delete_orphans(
        &self,
        collection: &str,
        reference_field: &str,
        target: &str,
        progress: &mut TaskProgress,
    ) -> SweepResult<()> {
        let base = Query::collection(collection);
        let mut cursor = None;
        while let Some(page) = self.next_page(&base, &mut cursor).await? {
            let mut known = HashMap::new();
            let mut orphans = Vec::new();
            for doc in &page {
                let live = match doc.str_field(reference_field) {
                    Some(id) => self.exists(target, id, &mut known).await?,
                    None => false,
                };
                if !live {
                    orphans.push(doc.reference(collection));
                }
            }
            if !orphans.is_empty() {
                self.call(self.store.batch_delete(&orphans)).await?;
                progress.record_batch(orphans.len());
                debug!(collection, deleted = orphans.len(), "deleted orphans");
            }
            if page.len() < self.config.batch_size {
                break;
            }
            self.pause().await;
        }
        Ok(())
    }

    async fn prune_pinned_messages(&self, progress: &mut TaskProgress) -> SweepResult<()> {
        let base = Query::collection(collections::CLUBS).filter(Filter::not_null(fields::PINNED_MESSAGES));
        let mut cursor = None;
        while let Some(page) = self.next_page(&base, &mut cursor).await? {
            let mut known = HashMap::new();
            let mut updates = Vec::new();
            let mut removed = 0;
            for club in &page {
                let entries = club
                    .get(fields::PINNED_MESSAGES)
                    .and_then(Value::as_array)
                    .cloned();
                let is_list = entries.is_some();
                let entries = entries.unwrap_or_default();
                let mut kept = Vec::with_capacity(entries.len());
                for entry in &entries {
                    let Some(id) = entry.as_str().filter(|id| !id.trim().is_empty()) else {
                        continue;
                    };
                    if self.exists(collections::CHAT_MESSAGES, id, &mut known).await? {
                        kept.push(entry.clone());
                    }
                }
                if !is_list || kept.len() != entries.len() {
                    removed += entries.len() - kept.len();
                    updates.push(DocUpdate::new(
                        club.reference(collections::CLUBS),
                        vec![FieldUpdate::set(fields::PINNED_MESSAGES, kept)],
                    ));
                }
            }
            if !updates.is_empty() {
                self.call(self.store.batch_update(&updates)).await?;
                progress.record_batch(removed);
                debug!(clubs = updates.len(), removed, "pruned pinned messages");
            }
            if page.len() < self.config.batch_size {
                break;
            }
            self.pause().await;
        }
        Ok(())
    }

    async fn prune_media(&self, progress: &mut TaskProgress) -> SweepResult<()> {
        let base = Query::collection(collections::CHAT_MESSAGES)
            .filter(Filter::less_than(
                fields::CREATED_AT,
                cutoff(self.now, self.config.retention.media)?,
            ))
            .filter(Filter::not_null(fields::MEDIA_ATTACHMENTS));
        let expired = self.expired();
        let mut cursor = None;
        while let Some(page) = self.next_page(&base, &mut cursor).await? {
            let mut updates = Vec::new();
            let mut removed = 0;
            for message in page.iter().filter(|m| !expired.matches(m)) {
                let attachments = message.get(fields::MEDIA_ATTACHMENTS).and_then(Value::as_array);
                let (kept, dropped, changed) = match attachments {
                    Some(list) => {
                        let kept: Vec<Value> = list.iter().filter(|a| has_url(a)).cloned().collect();
                        let dropped = list.len() - kept.len();
                        (kept, dropped, dropped > 0)
                    }
                    None => (Vec::new(), 0, true),
                };
                if changed {
                    removed += dropped;
                    updates.push(DocUpdate::new(
                        message.reference(collections::CHAT_MESSAGES),
                        vec![FieldUpdate::set(fields::MEDIA_ATTACHMENTS, kept)],
                    ));
                }
            }
            if !updates.is_empty() {
                self.call(self.store.batch_update(&updates)).await?;
                progress.record_batch(removed);
                debug!(messages = updates.len(), removed, "pruned media attachments");
            }
            if page.len() < self.config.batch_size {
                break;
            }
            self.pause().await;
        }
        Ok(())
    }
}

fn has_url(attachment: &Value) -> bool {
    attachment
        .get(fields::URL)
        .and_then(Value::as_str)
        .is_some_and(|url| !url.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn names_round_trip_through_clap() {
        for kind in TaskKind::ALL {
            assert_eq!(TaskKind::from_str(kind.name(), false).unwrap(), kind);
        }
    }

    #[test]
    fn only_age_based_tasks_have_eligible_queries() {
        let config = SweeperConfig::default();
        let now = OffsetDateTime::now_utc();
        for kind in TaskKind::ALL {
            assert_eq!(
                eligible_query(kind, &config, now).unwrap().is_some(),
                TaskKind::AGE_BASED.contains(&kind),
                "{kind}"
            );
        }
    }

    #[test]
    fn reaction_query_uses_window() {
        let config = SweeperConfig::default();
        let now = OffsetDateTime::from_unix_timestamp(100 * 86_400).unwrap();
        let query = eligible_query(TaskKind::OldReactions, &config, now)
            .unwrap()
            .unwrap();
        assert_eq!(query.collection, collections::CHAT_MESSAGES);
        assert_eq!(
            query.filters[0],
            Filter::less_than(fields::CREATED_AT, 10 * 86_400_000_i64)
        );
        assert_eq!(config.retention.reactions, Duration::from_secs(90 * 86_400));
    }

    #[test]
    fn windows_beyond_the_calendar_are_errors() {
        let mut config = SweeperConfig::default();
        config.retention.notifications = Duration::from_secs(1_000_000 * 365 * 86_400);
        let now = OffsetDateTime::now_utc();
        assert!(matches!(
            eligible_query(TaskKind::OldNotifications, &config, now),
            Err(SweepError::InvalidWindow(_))
        ));
        assert!(matches!(
            cutoff(now, Duration::MAX),
            Err(SweepError::InvalidWindow(_))
        ));
        assert!(eligible_query(TaskKind::ExpiredMessages, &config, now).is_ok());
    }

    #[test]
    fn attachment_url_validation() {
        assert!(has_url(&json!({"url": "https://x/y.png"})));
        assert!(!has_url(&json!({"url": ""})));
        assert!(!has_url(&json!({"url": "  "})));
        assert!(!has_url(&json!({"name": "a.png"})));
        assert!(!has_url(&json!("https://x")));
    }
}
