//! Operator-facing rendering of status records.

use serde::Serialize;

use crate::types::{PublishState, StatusRecord};

/// Maximum number of response body characters included in rendered text.
const MAX_RENDERED_BODY: usize = 4096;

/// The operator action offered for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorAction {
    RemoveFromQueue,
    AbortTransmission,
    PublishAgain,
}

impl OperatorAction {
    pub fn for_state(state: PublishState) -> Self {
        match state {
            PublishState::Pending | PublishState::FailurePending => OperatorAction::RemoveFromQueue,
            PublishState::InProgress => OperatorAction::AbortTransmission,
            PublishState::Success | PublishState::Failure | PublishState::Interrupted => {
                OperatorAction::PublishAgain
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OperatorAction::RemoveFromQueue => "remove from queue",
            OperatorAction::AbortTransmission => "abort transmission",
            OperatorAction::PublishAgain => "publish again",
        }
    }
}

/// Structured view of a status record for the operator API.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedStatus {
    pub state: PublishState,
    pub action: OperatorAction,
    pub text: String,
    pub record: StatusRecord,
}

impl RenderedStatus {
    pub fn new(record: StatusRecord) -> Self {
        RenderedStatus {
            state: record.state,
            action: OperatorAction::for_state(record.state),
            text: render_status(&record),
            record,
        }
    }
}

/// Renders a status record as operator text.
///
/// ```text
/// Error during build publishing [FAILURE_PENDING on public]
/// Action: remove from queue
///
/// Error: POST http://remote/createItem?name=app returned HTTP 500
///
/// Server response: HTTP 500
/// <body>
/// ```
pub fn render_status(record: &StatusRecord) -> String {
    let action = OperatorAction::for_state(record.state);
    let mut out = format!(
        "{} [{} on {}]\nAction: {}\n",
        record.message,
        record.state,
        record.target,
        action.label()
    );

    if let Some(error) = &record.error {
        out.push_str("\nError: ");
        out.push_str(&error.message);
        out.push('\n');

        if let Some(exchange) = &error.exchange {
            out.push_str(&format!(
                "\nServer response: HTTP {} from {} {}\n",
                exchange.status, exchange.method, exchange.url
            ));
            if !exchange.body.is_empty() {
                out.push_str(truncate(&exchange.body, MAX_RENDERED_BODY));
                out.push('\n');
            }
        }
    }

    out
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
