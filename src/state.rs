use crate::catalog::BankCatalog;
use crate::config::Config;
use crate::exam::{Assessment, SessionMode};
use crate::forms::FormState;
use crate::models::{ExamConfig, Question, QuestionBank};
use crate::runner::{QuizRunner, RunnerError};
use crate::selection::{select_for_session, SelectionRequest};
use crate::ws_protocol::{WsEnvelope, SESSION_CLOSED, TIME_EXPIRED};
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const RATE_WINDOW: TimeDelta = TimeDelta::seconds(60);

pub struct SessionRecord {
    pub id: i64,
    pub bank_id: String,
    pub exam: Option<ExamConfig>,
    pub assessment: Assessment<Question>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_active_at = now;
    }
}

pub struct FormRecord {
    pub id: i64,
    pub form: FormState,
    pub last_active_at: DateTime<Utc>,
}

pub struct InMemoryDb {
    pub sessions: RwLock<HashMap<i64, SessionRecord>>,
    pub forms: RwLock<HashMap<i64, FormRecord>>,
    pub broadcasters: DashMap<i64, broadcast::Sender<WsEnvelope>>,
    next_session_id: AtomicI64,
    next_form_id: AtomicI64,
}

impl Default for InMemoryDb {
    fn default() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            forms: RwLock::new(HashMap::new()),
            broadcasters: DashMap::new(),
            next_session_id: AtomicI64::new(1),
            next_form_id: AtomicI64::new(1),
        }
    }
}

impl InMemoryDb {
    pub fn next_session_id(&self) -> i64 {
        self.next_session_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_form_id(&self) -> i64 {
        self.next_form_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub mode: SessionMode,
    pub question_count: Option<usize>,
    pub section: Option<String>,
    pub seed: Option<u64>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: Vec<i64>,
    pub evicted: Vec<i64>,
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<InMemoryDb>,
    pub catalog: Arc<BankCatalog>,
    pub config: Arc<Config>,
    rate_limits: Arc<DashMap<String, (u32, DateTime<Utc>)>>,
}

impl AppState {
    pub fn new(catalog: BankCatalog, config: Config) -> Self {
        Self {
            db: Arc::new(InMemoryDb::default()),
            catalog: Arc::new(catalog),
            config: Arc::new(config),
            rate_limits: Arc::new(DashMap::new()),
        }
    }

    /// Fixed one-minute window per `scope:key`.
    pub fn check_rate_limit(&self, scope: &str, key: &str, now: DateTime<Utc>) -> bool {
        let limit = self.config.create_limit_per_minute;
        let full_key = format!("{scope}:{key}");
        let mut entry = self.rate_limits.entry(full_key).or_insert((0, now));
        if now - entry.1 > RATE_WINDOW {
            *entry = (1, now);
            true
        } else if entry.0 >= limit {
            false
        } else {
            entry.0 += 1;
            true
        }
    }

    /// Draws the questions for a new session and registers it, not yet started.
    pub async fn create_session(&self, bank: &QuestionBank, request: NewSession) -> Result<i64, RunnerError> {
        let mut rng = match request.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let selection = SelectionRequest {
            mode: request.mode,
            question_count: request.question_count,
            section: request.section,
        };
        let questions = select_for_session(bank, &selection, &mut rng);
        let runner = QuizRunner::new(questions.into())?;
        let time_limit = bank.exam.as_ref().and_then(|e| e.time_limit_secs);
        let assessment = Assessment::new(runner, request.mode, time_limit);

        let id = self.db.next_session_id();
        let now = Utc::now();
        let record = SessionRecord {
            id,
            bank_id: bank.id.clone(),
            exam: bank.exam.clone(),
            assessment,
            created_at: now,
            last_active_at: now,
        };
        self.db.sessions.write().await.insert(id, record);
        let (tx, _) = broadcast::channel(64);
        self.db.broadcasters.insert(id, tx);
        info!(session_id = id, bank_id = %bank.id, mode = ?request.mode, "session created");
        Ok(id)
    }

    pub async fn remove_session(&self, id: i64) -> bool {
        let removed = self.db.sessions.write().await.remove(&id).is_some();
        if let Some((_, sender)) = self.db.broadcasters.remove(&id) {
            let _ = sender.send(WsEnvelope::now(SESSION_CLOSED, json!({ "sessionId": id })));
        }
        removed
    }

    pub async fn create_form(&self, form: FormState) -> i64 {
        let id = self.db.next_form_id();
        let record = FormRecord {
            id,
            form,
            last_active_at: Utc::now(),
        };
        self.db.forms.write().await.insert(id, record);
        id
    }

    pub fn broadcast(&self, session_id: i64, envelope: WsEnvelope) {
        if let Some(sender) = self.db.broadcasters.get(&session_id) {
            let _ = sender.send(envelope);
        }
    }

    /// Submits exams whose clock ran out, drops sessions and form drafts idle
    /// for longer than the configured window and forgets closed rate windows.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let idle = i64::try_from(self.config.session_idle_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        let mut report = SweepReport::default();
        {
            let mut sessions = self.db.sessions.write().await;
            for (id, record) in sessions.iter_mut() {
                if record.assessment.expire_if_due(now) {
                    report.expired.push(*id);
                }
            }
            sessions.retain(|id, record| {
                let keep = now - record.last_active_at <= idle;
                if !keep {
                    report.evicted.push(*id);
                }
                keep
            });
        }
        self.db
            .forms
            .write()
            .await
            .retain(|_, record| now - record.last_active_at <= idle);
        self.rate_limits
            .retain(|_, (_, window_start)| now - *window_start <= RATE_WINDOW);

        for id in &report.expired {
            info!(session_id = id, "exam time expired, submitted");
            self.broadcast(*id, WsEnvelope::now(TIME_EXPIRED, json!({ "sessionId": id, "phase": "showingResults" })));
        }
        for id in &report.evicted {
            debug!(session_id = id, "idle session evicted");
            if let Some((_, sender)) = self.db.broadcasters.remove(id) {
                let _ = sender.send(WsEnvelope::now(SESSION_CLOSED, json!({ "sessionId": id, "reason": "idle" })));
            }
        }
        report.expired.sort_unstable();
        report.evicted.sort_unstable();
        report
    }
}

pub fn spawn_sweeper(state: AppState) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.sweep_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            state.sweep(Utc::now()).await;
        }
    })
}
