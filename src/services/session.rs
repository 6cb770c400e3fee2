use crate::utils::kv_store::KvStore;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{error, info};
use uuid::Uuid;

const HISTORY_KEY: &str = "sessionHistory";
const CURRENT_KEY: &str = "currentSession";
const SETTINGS_KEY: &str = "sessionSettings";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    /// Milliseconds, computed at stop time; 0 while active.
    pub duration: i64,
    pub activities: Vec<ActivityEntry>,
    pub settings: SessionSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    pub auto_save: bool,
    pub session_timeout_ms: u64,
    pub max_history_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            auto_save: true,
            session_timeout_ms: 30 * 60 * 1000,
            max_history_size: 50,
        }
    }
}

/// Partial settings update; unset fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub auto_save: Option<bool>,
    pub session_timeout_ms: Option<u64>,
    pub max_history_size: Option<usize>,
}

impl SessionSettings {
    fn merge(&mut self, patch: &SettingsPatch) {
        if let Some(auto_save) = patch.auto_save {
            self.auto_save = auto_save;
        }
        if let Some(timeout) = patch.session_timeout_ms {
            self.session_timeout_ms = timeout;
        }
        if let Some(max) = patch.max_history_size {
            self.max_history_size = max;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewActivity {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub description: Option<String>,
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_sessions: usize,
    pub total_duration: i64,
    pub avg_duration: f64,
    pub current_session: Option<SessionRecord>,
    pub last_session: Option<SessionRecord>,
}

#[derive(Debug, Clone)]
pub struct RestartOutcome {
    pub stopped: Option<SessionRecord>,
    pub started: SessionRecord,
}

/// Change notification carrying the updated record, so observers never need
/// to diff the whole store.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started(SessionRecord),
    Stopped(SessionRecord),
    ActivityAdded(ActivityEntry),
    SettingsUpdated(SessionSettings),
    HistoryCleared,
    SessionDeleted(String),
    Imported,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportBlob {
    current_session: Option<SessionRecord>,
    #[serde(default)]
    session_history: Vec<SessionRecord>,
    #[serde(default)]
    settings: Option<SettingsPatch>,
}

/// Tracks the single current work session plus a bounded most-recent-first
/// history. Owns its state exclusively; all mutation goes through these
/// methods. Persistence failures are logged and reported, never rolled back.
pub struct SessionStore {
    store: Box<dyn KvStore>,
    current: Option<SessionRecord>,
    history: Vec<SessionRecord>,
    settings: SessionSettings,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionStore {
    pub fn new(store: Box<dyn KvStore>) -> Self {
        let (events, _) = broadcast::channel(32);
        let mut this = Self {
            store,
            current: None,
            history: Vec::new(),
            settings: SessionSettings::default(),
            events,
        };
        this.load();
        this
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn load(&mut self) {
        if let Some(raw) = self.store.get(HISTORY_KEY) {
            match serde_json::from_str(&raw) {
                Ok(history) => self.history = history,
                Err(e) => {
                    error!(error = %e, "Failed to parse stored session history, resetting");
                    self.history = Vec::new();
                }
            }
        }

        if let Some(raw) = self.store.get(CURRENT_KEY) {
            match serde_json::from_str(&raw) {
                Ok(current) => self.current = Some(current),
                Err(e) => {
                    error!(error = %e, "Failed to parse stored current session, resetting");
                    self.current = None;
                }
            }
        }

        if let Some(raw) = self.store.get(SETTINGS_KEY) {
            match serde_json::from_str::<SettingsPatch>(&raw) {
                Ok(patch) => self.settings.merge(&patch),
                Err(e) => {
                    error!(error = %e, "Failed to parse stored session settings, using defaults")
                }
            }
        }
    }

    /// Writes the full store state back out. Returns false on failure;
    /// in-memory state is left as-is either way.
    fn persist(&self) -> bool {
        let result: Result<(), Box<dyn std::error::Error>> = (|| {
            self.store
                .set(HISTORY_KEY, &serde_json::to_string(&self.history)?)?;
            match &self.current {
                Some(current) => self
                    .store
                    .set(CURRENT_KEY, &serde_json::to_string(current)?)?,
                None => self.store.remove(CURRENT_KEY)?,
            }
            self.store
                .set(SETTINGS_KEY, &serde_json::to_string(&self.settings)?)?;
            Ok(())
        })();

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Failed to save session data");
                false
            }
        }
    }

    fn notify(&self, event: SessionEvent) {
        // Best-effort: no subscribers is fine.
        let _ = self.events.send(event);
    }

    fn persist_and_notify(&self, event: SessionEvent) {
        if self.persist() {
            self.notify(event);
        }
    }

    fn generate_id() -> String {
        format!("{}-{}", Utc::now().timestamp_millis(), Uuid::new_v4().simple())
    }

    pub fn start(&mut self, name: Option<&str>) -> SessionRecord {
        // Starting is never additive: finalize the active session first.
        if self.current.is_some() {
            self.stop();
        }

        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("Session {}", Local::now().format("%Y-%m-%d %H:%M:%S")));

        let record = SessionRecord {
            id: Self::generate_id(),
            name,
            start_time: Utc::now(),
            end_time: None,
            status: SessionStatus::Active,
            duration: 0,
            activities: Vec::new(),
            settings: self.settings,
        };

        info!(session_id = %record.id, name = %record.name, "Session started");
        self.current = Some(record.clone());
        self.persist_and_notify(SessionEvent::Started(record.clone()));
        record
    }

    pub fn stop(&mut self) -> Option<SessionRecord> {
        let mut record = self.current.take()?;

        let now = Utc::now();
        record.end_time = Some(now);
        record.status = SessionStatus::Stopped;
        record.duration = (now - record.start_time).num_milliseconds();

        self.history.insert(0, record.clone());
        self.history.truncate(self.settings.max_history_size);

        info!(session_id = %record.id, duration_ms = record.duration, "Session stopped");
        self.persist_and_notify(SessionEvent::Stopped(record.clone()));
        Some(record)
    }

    pub fn restart(&mut self, name: Option<&str>) -> RestartOutcome {
        let stopped = self.stop();
        let started = self.start(name);
        RestartOutcome { stopped, started }
    }

    pub fn add_activity(&mut self, activity: NewActivity) -> Option<ActivityEntry> {
        let current = self.current.as_mut()?;

        let entry = ActivityEntry {
            id: Self::generate_id(),
            timestamp: Utc::now(),
            kind: activity.kind.unwrap_or_else(|| "general".to_string()),
            description: activity.description.unwrap_or_default(),
            data: activity.data.unwrap_or_else(|| Value::Object(Default::default())),
        };

        current.activities.push(entry.clone());
        self.persist_and_notify(SessionEvent::ActivityAdded(entry.clone()));
        Some(entry)
    }

    pub fn current_session(&self) -> Option<&SessionRecord> {
        self.current.as_ref()
    }

    pub fn history(&self) -> &[SessionRecord] {
        &self.history
    }

    pub fn session_by_id(&self, id: &str) -> Option<&SessionRecord> {
        if let Some(current) = &self.current {
            if current.id == id {
                return Some(current);
            }
        }
        self.history.iter().find(|s| s.id == id)
    }

    fn live_duration_ms(record: &SessionRecord) -> i64 {
        let end = record.end_time.unwrap_or_else(Utc::now);
        (end - record.start_time).num_milliseconds()
    }

    pub fn stats(&self) -> SessionStats {
        let total_sessions = self.history.len() + usize::from(self.current.is_some());
        let total_duration = self.history.iter().map(|s| s.duration).sum::<i64>()
            + self
                .current
                .as_ref()
                .map(Self::live_duration_ms)
                .unwrap_or(0);
        let avg_duration = if total_sessions > 0 {
            total_duration as f64 / total_sessions as f64
        } else {
            0.0
        };

        SessionStats {
            total_sessions,
            total_duration,
            avg_duration,
            current_session: self.current.clone(),
            last_session: self.history.first().cloned(),
        }
    }

    /// Renders a session's duration as `HH:MM:SS`; falls back to the current
    /// session, and to a live duration while the session is still running.
    pub fn formatted_duration(&self, session: Option<&SessionRecord>) -> String {
        let target = match session.or(self.current.as_ref()) {
            Some(t) => t,
            None => return "00:00:00".to_string(),
        };

        let duration = if target.duration != 0 {
            target.duration
        } else {
            Self::live_duration_ms(target)
        }
        .max(0);

        let hours = duration / (1000 * 60 * 60);
        let minutes = (duration % (1000 * 60 * 60)) / (1000 * 60);
        let seconds = (duration % (1000 * 60)) / 1000;
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }

    pub fn update_settings(&mut self, patch: SettingsPatch) -> SessionSettings {
        self.settings.merge(&patch);
        self.persist_and_notify(SessionEvent::SettingsUpdated(self.settings));
        self.settings
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        self.persist_and_notify(SessionEvent::HistoryCleared);
    }

    pub fn delete_session(&mut self, id: &str) {
        self.history.retain(|s| s.id != id);
        self.persist_and_notify(SessionEvent::SessionDeleted(id.to_string()));
    }

    pub fn export(&self) -> String {
        let blob = serde_json::json!({
            "currentSession": self.current,
            "sessionHistory": self.history,
            "settings": self.settings,
        });
        serde_json::to_string_pretty(&blob).unwrap_or_else(|_| "{}".to_string())
    }

    /// Fails closed: a payload that does not parse leaves the store untouched.
    pub fn import(&mut self, raw: &str) -> bool {
        let blob: ExportBlob = match serde_json::from_str(raw) {
            Ok(blob) => blob,
            Err(e) => {
                error!(error = %e, "Failed to parse imported session data");
                return false;
            }
        };

        self.current = blob.current_session;
        self.history = blob.session_history;
        if let Some(patch) = blob.settings {
            self.settings.merge(&patch);
        }
        self.persist_and_notify(SessionEvent::Imported);
        true
    }

    pub fn is_active(&self) -> bool {
        matches!(&self.current, Some(s) if s.status == SessionStatus::Active)
    }

    pub fn status_label(&self) -> &'static str {
        match &self.current {
            None => "no_session",
            Some(s) => match s.status {
                SessionStatus::Active => "active",
                SessionStatus::Stopped => "stopped",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::kv_store::FileKvStore;
    use chrono::Duration;
    use tempfile::{tempdir, TempDir};

    fn store_in(dir: &TempDir) -> SessionStore {
        SessionStore::new(Box::new(
            FileKvStore::new(dir.path().to_path_buf()).unwrap(),
        ))
    }

    #[test]
    fn start_while_active_finalizes_exactly_one_record() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);

        let first = store.start(None);
        let second = store.start(None);

        assert_eq!(store.history().len(), 1);
        assert_eq!(store.history()[0].id, first.id);
        assert_eq!(store.history()[0].status, SessionStatus::Stopped);
        assert_ne!(first.id, second.id);
        assert_eq!(store.current_session().unwrap().id, second.id);
        assert_eq!(store.current_session().unwrap().status, SessionStatus::Active);
    }

    #[test]
    fn stop_without_active_session_is_a_noop() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);

        assert!(store.stop().is_none());
        assert!(store.history().is_empty());
        assert_eq!(store.status_label(), "no_session");
    }

    #[test]
    fn history_is_capped_and_oldest_entries_evicted() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);
        store.update_settings(SettingsPatch {
            max_history_size: Some(3),
            ..Default::default()
        });

        let mut stopped_ids = Vec::new();
        for i in 0..5 {
            store.start(Some(&format!("s{}", i)));
            stopped_ids.push(store.stop().unwrap().id);
        }

        assert_eq!(store.history().len(), 3);
        // Most-recent-first; the two oldest are gone.
        assert_eq!(store.history()[0].id, stopped_ids[4]);
        assert_eq!(store.history()[2].id, stopped_ids[2]);
        assert!(!store.history().iter().any(|s| s.id == stopped_ids[0]));
    }

    #[test]
    fn formatted_duration_renders_hh_mm_ss() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);

        let mut record = store.start(Some("timed"));
        store.stop();
        record.end_time = Some(record.start_time + Duration::milliseconds(3_661_000));
        record.duration = 3_661_000;

        assert_eq!(store.formatted_duration(Some(&record)), "01:01:01");

        let empty_dir = tempdir().unwrap();
        let empty = store_in(&empty_dir);
        assert_eq!(empty.formatted_duration(None), "00:00:00");
    }

    #[test]
    fn activity_then_stop_scenario() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);

        store.start(Some("Demo"));
        let entry = store
            .add_activity(NewActivity {
                kind: Some("note".to_string()),
                description: Some("a note".to_string()),
                data: None,
            })
            .unwrap();
        assert_eq!(entry.kind, "note");

        let stopped = store.stop().unwrap();
        assert_eq!(stopped.activities.len(), 1);
        assert_eq!(stopped.status, SessionStatus::Stopped);
        assert!(stopped.end_time.is_some());
        assert!(stopped.duration >= 0);
    }

    #[test]
    fn add_activity_without_active_session_returns_none() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);
        assert!(store.add_activity(NewActivity::default()).is_none());
    }

    #[test]
    fn activity_kind_defaults_to_general() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);
        store.start(None);
        let entry = store.add_activity(NewActivity::default()).unwrap();
        assert_eq!(entry.kind, "general");
        assert_eq!(entry.description, "");
    }

    #[test]
    fn restart_returns_both_records() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);

        let outcome = store.restart(Some("fresh"));
        assert!(outcome.stopped.is_none());
        assert_eq!(outcome.started.name, "fresh");

        let outcome = store.restart(None);
        assert_eq!(outcome.stopped.unwrap().name, "fresh");
        assert_ne!(outcome.started.name, "fresh");
    }

    #[test]
    fn state_survives_reload_from_disk() {
        let dir = tempdir().unwrap();
        let started = {
            let mut store = store_in(&dir);
            store.update_settings(SettingsPatch {
                max_history_size: Some(7),
                ..Default::default()
            });
            store.start(Some("persisted"))
        };

        let reloaded = store_in(&dir);
        assert_eq!(reloaded.current_session().unwrap().id, started.id);
        assert_eq!(reloaded.settings().max_history_size, 7);
        assert!(reloaded.is_active());
    }

    #[test]
    fn corrupt_history_on_disk_resets_to_empty() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("sessionHistory.json"), "not json").unwrap();

        let store = store_in(&dir);
        assert!(store.history().is_empty());
    }

    #[test]
    fn export_import_round_trip() {
        let source_dir = tempdir().unwrap();
        let mut source = store_in(&source_dir);
        source.start(Some("a"));
        source.stop();
        source.start(Some("b"));
        let blob = source.export();

        let target_dir = tempdir().unwrap();
        let mut target = store_in(&target_dir);
        assert!(target.import(&blob));
        assert_eq!(target.history().len(), 1);
        assert_eq!(target.current_session().unwrap().name, "b");
    }

    #[test]
    fn import_of_malformed_payload_fails_closed() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);
        store.start(Some("keep me"));

        assert!(!store.import("{ definitely not json"));
        assert_eq!(store.current_session().unwrap().name, "keep me");
        assert!(store.history().is_empty());
    }

    #[test]
    fn delete_and_clear_history() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);

        store.start(None);
        let a = store.stop().unwrap();
        store.start(None);
        let b = store.stop().unwrap();

        store.delete_session(&a.id);
        assert_eq!(store.history().len(), 1);
        assert_eq!(store.history()[0].id, b.id);

        store.clear_history();
        assert!(store.history().is_empty());
    }

    #[test]
    fn session_by_id_checks_current_then_history() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);

        store.start(None);
        let old = store.stop().unwrap();
        let current = store.start(None);

        assert_eq!(store.session_by_id(&current.id).unwrap().id, current.id);
        assert_eq!(store.session_by_id(&old.id).unwrap().id, old.id);
        assert!(store.session_by_id("nope").is_none());
    }

    #[test]
    fn stats_aggregate_history_and_active_session() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);

        store.start(None);
        store.stop();
        store.start(None);

        let stats = store.stats();
        assert_eq!(stats.total_sessions, 2);
        assert!(stats.current_session.is_some());
        assert!(stats.last_session.is_some());
        assert!(stats.total_duration >= 0);
    }

    #[test]
    fn settings_merge_keeps_unpatched_fields() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);

        let updated = store.update_settings(SettingsPatch {
            session_timeout_ms: Some(60_000),
            ..Default::default()
        });
        assert_eq!(updated.session_timeout_ms, 60_000);
        assert!(updated.auto_save);
        assert_eq!(updated.max_history_size, 50);
    }

    #[test]
    fn observers_receive_typed_events() {
        let dir = tempdir().unwrap();
        let mut store = store_in(&dir);
        let mut events = store.subscribe();

        let started = store.start(Some("watched"));
        match events.try_recv().unwrap() {
            SessionEvent::Started(record) => assert_eq!(record.id, started.id),
            other => panic!("unexpected event: {:?}", other),
        }

        store.stop();
        assert!(matches!(
            events.try_recv().unwrap(),
            SessionEvent::Stopped(_)
        ));
    }
}
