use crate::error::AppError;
use crate::exam::{Assessment, ExamStats, SessionMode};
use crate::forms::{FieldMap, FieldValue, FormKind, FormState};
use crate::models::{Difficulty, ExamConfig, Question, QuestionId};
use crate::runner::{Phase, RunnerError};
use crate::state::{AppState, NewSession, SessionRecord};
use crate::summary::{QuestionStatus, ReviewFilter};
use crate::ws_protocol::{WsEnvelope, REQUEST_VIEW, SESSION_CLOSED, SESSION_UPDATE, TIME_EXPIRED};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use futures::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use validator::Validate;

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn client_key(headers: &HeaderMap) -> &str {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .unwrap_or("local")
}

/// A question as shown to the learner: no answer key, no explanation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub id: QuestionId,
    pub prompt: String,
    pub options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl From<&Question> for QuestionView {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id.clone(),
            prompt: q.prompt.clone(),
            options: q.options.clone(),
            section: q.section.clone(),
            difficulty: q.difficulty,
            category: q.category.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BankQuery {
    pub q: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BankSummary {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub question_count: usize,
    pub has_exam: bool,
    pub categories: Vec<String>,
}

pub async fn list_banks(State(state): State<AppState>, Query(query): Query<BankQuery>) -> Json<Vec<BankSummary>> {
    let needle = query.q.map(|q| q.trim().to_lowercase()).filter(|q| !q.is_empty());
    let banks = state
        .catalog
        .iter()
        .filter(|bank| match &needle {
            Some(n) => bank.title.to_lowercase().contains(n) || bank.id.to_lowercase().contains(n),
            None => true,
        })
        .map(|bank| BankSummary {
            id: bank.id.clone(),
            title: bank.title.clone(),
            description: bank.description.clone(),
            question_count: bank.questions.len(),
            has_exam: bank.exam.is_some(),
            categories: bank.categories.clone(),
        })
        .collect();
    Json(banks)
}

pub async fn get_bank(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let bank = state
        .catalog
        .get(&id)
        .ok_or_else(|| AppError::not_found("question bank", request_id_from_headers(&headers)))?;
    let questions: Vec<QuestionView> = bank.questions.iter().map(QuestionView::from).collect();
    Ok(Json(json!({
        "id": bank.id,
        "title": bank.title,
        "description": bank.description,
        "categories": bank.categories,
        "exam": bank.exam,
        "questionCount": questions.len(),
        "questions": questions
    })))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionPayload {
    #[validate(length(min = 1))]
    pub bank_id: String,
    #[serde(default)]
    pub mode: SessionMode,
    #[validate(range(min = 1, max = 500))]
    pub question_count: Option<usize>,
    #[validate(length(min = 1))]
    pub section: Option<String>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackView {
    pub is_correct: bool,
    pub correct_option_index: usize,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: i64,
    pub bank_id: String,
    pub mode: SessionMode,
    pub phase: Phase,
    pub cursor: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_question: Option<QuestionView>,
    pub selected_option: Option<usize>,
    pub ledger: Vec<Option<usize>>,
    pub can_advance: bool,
    pub can_retreat: bool,
    pub is_last: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<FeedbackView>,
    pub flagged: Vec<usize>,
    pub stats: ExamStats,
    pub remaining_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_path: Option<String>,
}

impl SessionView {
    fn build(record: &SessionRecord, now: DateTime<Utc>) -> Self {
        let assessment = &record.assessment;
        let runner = assessment.runner();
        let in_progress = runner.phase() == Phase::InProgress;
        let feedback = assessment.feedback().map(|f| FeedbackView {
            is_correct: f.is_correct,
            correct_option_index: f.correct_option_index,
            explanation: runner.current().explanation.clone(),
        });
        Self {
            session_id: record.id,
            bank_id: record.bank_id.clone(),
            mode: assessment.mode(),
            phase: runner.phase(),
            cursor: runner.cursor(),
            total: runner.len(),
            current_question: in_progress.then(|| QuestionView::from(runner.current())),
            selected_option: runner.selected(),
            ledger: runner.ledger().to_vec(),
            can_advance: in_progress && runner.can_advance(),
            can_retreat: in_progress && runner.can_retreat(),
            is_last: runner.is_last(),
            feedback,
            flagged: assessment.flagged().iter().copied().collect(),
            stats: assessment.stats(),
            remaining_secs: assessment.remaining_secs(now),
            exit_path: record.exam.as_ref().and_then(|e| e.exit_path.clone()),
        }
    }

    fn envelope(&self, event: &str) -> WsEnvelope {
        WsEnvelope::now(event, serde_json::to_value(self).unwrap_or(Value::Null))
    }
}

pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateSessionPayload>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let client = client_key(&headers);
    if !state.check_rate_limit("sessions_create", client, Utc::now()) {
        warn!(client, "session creation rate limited");
        return Err(AppError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "too many requests",
            req_id,
        ));
    }
    payload
        .validate()
        .map_err(|errors| AppError::from_payload(&errors, req_id.clone()))?;
    let bank = state
        .catalog
        .get(&payload.bank_id)
        .ok_or_else(|| AppError::not_found("question bank", req_id.clone()))?;

    let request = NewSession {
        mode: payload.mode,
        question_count: payload.question_count,
        section: payload.section,
        seed: payload.seed,
    };
    let id = state
        .create_session(&bank, request)
        .await
        .map_err(|err| AppError::from_runner(err, req_id.clone()))?;
    let total = state
        .db
        .sessions
        .read()
        .await
        .get(&id)
        .map(|s| s.assessment.runner().len())
        .unwrap_or(0);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "sessionId": id, "phase": Phase::NotStarted, "total": total })),
    ))
}

/// Applies `op` to the session after settling its clock, then pushes the new
/// view to WebSocket subscribers.
async fn mutate_session<T>(
    state: &AppState,
    id: i64,
    req_id: String,
    op: impl FnOnce(&mut Assessment<Question>, DateTime<Utc>) -> Result<T, RunnerError>,
) -> Result<Json<SessionView>, AppError> {
    let now = Utc::now();
    let (expired, outcome) = {
        let mut sessions = state.db.sessions.write().await;
        let record = sessions
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("session", req_id.clone()))?;
        record.touch(now);
        let expired = record.assessment.expire_if_due(now);
        let outcome = op(&mut record.assessment, now).map(|_| SessionView::build(record, now));
        (expired.then(|| SessionView::build(record, now)), outcome)
    };
    if let Some(view) = expired {
        info!(session_id = id, "exam time expired, submitted");
        state.broadcast(id, view.envelope(TIME_EXPIRED));
    }
    let view = outcome.map_err(|err| AppError::from_runner(err, req_id.clone()))?;
    state.broadcast(id, view.envelope(SESSION_UPDATE).with_request_id(Some(req_id)));
    Ok(Json(view))
}

/// Current view of a session, settling an overdue exam clock on the way.
async fn load_view(state: &AppState, id: i64) -> Option<SessionView> {
    let now = Utc::now();
    let (view, expired) = {
        let mut sessions = state.db.sessions.write().await;
        let record = sessions.get_mut(&id)?;
        record.touch(now);
        let expired = record.assessment.expire_if_due(now);
        (SessionView::build(record, now), expired)
    };
    if expired {
        state.broadcast(id, view.envelope(TIME_EXPIRED));
    }
    Some(view)
}

pub async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<SessionView>, AppError> {
    load_view(&state, id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::not_found("session", request_id_from_headers(&headers)))
}

pub async fn start_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<SessionView>, AppError> {
    let view = mutate_session(&state, id, request_id_from_headers(&headers), |a, now| a.start(now)).await?;
    info!(session_id = id, total = view.total, "session started");
    Ok(view)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectPayload {
    pub option_index: usize,
}

pub async fn select_option(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<SelectPayload>,
) -> Result<Json<SessionView>, AppError> {
    mutate_session(&state, id, request_id_from_headers(&headers), |a, _| {
        a.select_option(payload.option_index)
    })
    .await
}

pub async fn advance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<SessionView>, AppError> {
    mutate_session(&state, id, request_id_from_headers(&headers), |a, _| a.advance()).await
}

pub async fn retreat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<SessionView>, AppError> {
    mutate_session(&state, id, request_id_from_headers(&headers), |a, _| a.retreat()).await
}

pub async fn restart(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<SessionView>, AppError> {
    mutate_session(&state, id, request_id_from_headers(&headers), |a, now| {
        a.restart(now);
        Ok(())
    })
    .await
}

pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<SessionView>, AppError> {
    let view = mutate_session(&state, id, request_id_from_headers(&headers), |a, _| a.submit()).await?;
    info!(session_id = id, answered = view.stats.answered, "exam submitted");
    Ok(view)
}

pub async fn toggle_flag(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<SessionView>, AppError> {
    mutate_session(&state, id, request_id_from_headers(&headers), |a, _| a.toggle_flag()).await
}

pub async fn next_flagged(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<SessionView>, AppError> {
    mutate_session(&state, id, request_id_from_headers(&headers), |a, _| a.next_flagged()).await
}

#[derive(Debug, Deserialize)]
pub struct JumpPayload {
    pub index: usize,
}

pub async fn jump(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<JumpPayload>,
) -> Result<Json<SessionView>, AppError> {
    mutate_session(&state, id, request_id_from_headers(&headers), |a, _| a.jump_to(payload.index)).await
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    #[serde(default)]
    pub filter: ReviewFilter,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewItem {
    pub position: usize,
    pub id: QuestionId,
    pub prompt: String,
    pub options: Vec<String>,
    pub selected_option: Option<usize>,
    pub selected_text: String,
    pub correct_option_index: usize,
    pub correct_text: String,
    pub is_correct: bool,
    pub status: QuestionStatus,
    pub flagged: bool,
    pub explanation: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsView {
    pub session_id: i64,
    pub score: usize,
    pub total: usize,
    pub percentage: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass_threshold: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_path: Option<String>,
    pub stats: ExamStats,
    pub filter: ReviewFilter,
    pub questions: Vec<ReviewItem>,
}

fn option_text(question: &Question, index: Option<usize>) -> String {
    index
        .and_then(|i| question.options.get(i))
        .cloned()
        .unwrap_or_else(|| "Not answered".to_string())
}

pub async fn session_results(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<ResultsView>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let now = Utc::now();
    let mut sessions = state.db.sessions.write().await;
    let record = sessions
        .get_mut(&id)
        .ok_or_else(|| AppError::not_found("session", req_id.clone()))?;
    record.touch(now);
    if record.assessment.expire_if_due(now) {
        state.broadcast(id, SessionView::build(record, now).envelope(TIME_EXPIRED));
    }

    let assessment = &record.assessment;
    let summary = assessment
        .summary()
        .map_err(|err| AppError::from_runner(err, req_id.clone()))?;
    let exam: Option<&ExamConfig> = record.exam.as_ref();
    let flagged = assessment.flagged();
    let questions = summary
        .filtered(query.filter, flagged)
        .into_iter()
        .map(|o| ReviewItem {
            position: o.position,
            id: o.question.id.clone(),
            prompt: o.question.prompt.clone(),
            options: o.question.options.clone(),
            selected_option: o.selected_option,
            selected_text: option_text(o.question, o.selected_option),
            correct_option_index: o.question.correct_option_index,
            correct_text: option_text(o.question, Some(o.question.correct_option_index)),
            is_correct: o.is_correct,
            status: o.status,
            flagged: flagged.contains(&o.position),
            explanation: o.question.explanation.clone(),
        })
        .collect();
    Ok(Json(ResultsView {
        session_id: id,
        score: summary.score,
        total: summary.total,
        percentage: summary.percentage,
        pass_threshold: exam.map(|e| e.pass_threshold),
        passed: exam.map(|e| summary.passed(e.pass_threshold)),
        exit_path: exam.and_then(|e| e.exit_path.clone()),
        stats: assessment.stats(),
        filter: query.filter,
        questions,
    }))
}

pub async fn delete_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    if state.remove_session(id).await {
        info!(session_id = id, "session closed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("session", request_id_from_headers(&headers)))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateFormPayload {
    pub kind: FormKind,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormView {
    pub form_id: i64,
    pub kind: FormKind,
    pub fields: FieldMap,
    pub completion_pct: u32,
    pub missing_required: Vec<&'static str>,
    pub is_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zs_within_limit: Option<bool>,
}

impl FormView {
    fn build(id: i64, form: &FormState) -> Self {
        Self {
            form_id: id,
            kind: form.kind(),
            fields: form.fields().clone(),
            completion_pct: form.completion_percentage(),
            missing_required: form.missing_required(),
            is_complete: form.is_complete(),
            zs_within_limit: form.zs_within_limit(),
        }
    }
}

pub async fn create_form(
    State(state): State<AppState>,
    Json(payload): Json<CreateFormPayload>,
) -> (StatusCode, Json<FormView>) {
    let form = FormState::new(payload.kind);
    let id = state.create_form(form.clone()).await;
    info!(form_id = id, kind = ?payload.kind, "form draft created");
    (StatusCode::CREATED, Json(FormView::build(id, &form)))
}

pub async fn get_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Json<FormView>, AppError> {
    let mut forms = state.db.forms.write().await;
    let record = forms
        .get_mut(&id)
        .ok_or_else(|| AppError::not_found("form", request_id_from_headers(&headers)))?;
    record.last_active_at = Utc::now();
    Ok(Json(FormView::build(id, &record.form)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateFormPayload {
    #[validate(length(min = 1, max = 64))]
    pub field: String,
    pub value: FieldValue,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormUpdateView {
    #[serde(flatten)]
    pub form: FormView,
    pub derived: FieldMap,
    pub warnings: Vec<String>,
}

pub async fn update_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateFormPayload>,
) -> Result<Json<FormUpdateView>, AppError> {
    let req_id = request_id_from_headers(&headers);
    payload
        .validate()
        .map_err(|errors| AppError::from_payload(&errors, req_id.clone()))?;
    let mut forms = state.db.forms.write().await;
    let record = forms
        .get_mut(&id)
        .ok_or_else(|| AppError::not_found("form", req_id.clone()))?;
    record.last_active_at = Utc::now();
    let changes = record
        .form
        .apply_update(&payload.field, payload.value)
        .map_err(|err| AppError::from_form(err, req_id))?;
    Ok(Json(FormUpdateView {
        form: FormView::build(id, &record.form),
        derived: changes.derived,
        warnings: changes.warnings,
    }))
}

pub async fn delete_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    match state.db.forms.write().await.remove(&id) {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(AppError::not_found("form", request_id_from_headers(&headers))),
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Response {
    ws.on_upgrade(move |socket| ws_session(socket, state, id))
}

async fn ws_session(stream: WebSocket, state: AppState, session_id: i64) {
    let receiver = match state.db.broadcasters.get(&session_id) {
        Some(sender) => sender.subscribe(),
        None => return,
    };

    let (mut sender_ws, mut receiver_ws) = stream.split();
    if let Some(view) = load_view(&state, session_id).await {
        if let Ok(text) = serde_json::to_string(&view.envelope(SESSION_UPDATE)) {
            if sender_ws.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
    }

    let send_task = tokio::spawn(forward_events(receiver, sender_ws));

    while let Some(Ok(message)) = receiver_ws.next().await {
        let Message::Text(txt) = message else { continue };
        let Ok(env) = serde_json::from_str::<WsEnvelope>(&txt) else { continue };
        if env.event == REQUEST_VIEW {
            let Some(view) = load_view(&state, session_id).await else { break };
            state.broadcast(session_id, view.envelope(SESSION_UPDATE).with_request_id(env.request_id));
        }
    }

    send_task.abort();
    info!(session_id, "ws disconnected");
}

/// Relays session events to one socket. A slow socket skips what it missed
/// and keeps going; only a closed channel or a dead socket ends the loop.
async fn forward_events<S>(mut receiver: broadcast::Receiver<WsEnvelope>, mut sink: S)
where
    S: Sink<Message> + Unpin,
{
    loop {
        let msg = match receiver.recv().await {
            Ok(msg) => msg,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "ws receiver lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let closing = msg.event == SESSION_CLOSED;
        if let Ok(text) = serde_json::to_string(&msg) {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        if closing {
            let _ = sink.send(Message::Close(None)).await;
            break;
        }
    }
}
