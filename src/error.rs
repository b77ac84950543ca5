use crate::forms::FormError;
use crate::models::ValidationIssue;
use crate::runner::RunnerError;
use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use validator::ValidationErrors;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub field: String,
    pub issue: String,
}

impl From<ValidationIssue> for ErrorDetail {
    fn from(issue: ValidationIssue) -> Self {
        Self {
            field: issue.field,
            issue: issue.issue,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: Vec::new(),
            request_id: request_id.into(),
        }
    }

    pub fn with_details(mut self, details: Vec<ErrorDetail>) -> Self {
        self.details = details;
        self
    }

    pub fn not_found(what: &str, request_id: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", format!("{what} not found"), request_id)
    }

    pub fn validation(message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message, request_id)
    }

    pub fn from_runner(err: RunnerError, request_id: impl Into<String>) -> Self {
        let (status, code) = match &err {
            RunnerError::EmptyBank => (StatusCode::UNPROCESSABLE_ENTITY, "EMPTY_SELECTION"),
            RunnerError::WrongPhase { .. } => (StatusCode::CONFLICT, "INVALID_STATE"),
            RunnerError::OptionOutOfRange { .. } | RunnerError::QuestionOutOfRange { .. } => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            RunnerError::AnswerRequired => (StatusCode::CONFLICT, "ANSWER_REQUIRED"),
            RunnerError::ExamOnly { .. } => (StatusCode::CONFLICT, "EXAM_ONLY"),
        };
        Self::new(status, code, err.to_string(), request_id)
    }

    pub fn from_form(err: FormError, request_id: impl Into<String>) -> Self {
        let field = match &err {
            FormError::UnknownField { field, .. } | FormError::WrongType { field, .. } => field.clone(),
        };
        let message = err.to_string();
        Self::validation(message.clone(), request_id).with_details(vec![ErrorDetail { field, issue: message }])
    }

    pub fn from_payload(errors: &ValidationErrors, request_id: impl Into<String>) -> Self {
        let mut details: Vec<ErrorDetail> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| ErrorDetail {
                    field: field.to_string(),
                    issue: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string()),
                })
            })
            .collect();
        details.sort_by(|a, b| a.field.cmp(&b.field));
        Self::validation("invalid request payload", request_id).with_details(details)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let payload = ErrorBody {
            error: ErrorPayload {
                code: self.code,
                message: self.message,
                details: self.details,
                request_id: self.request_id,
            },
        };
        (self.status, Json(payload)).into_response()
    }
}
