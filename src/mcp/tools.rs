//! MCP Tools Implementation
//!
//! Each tool wraps one [`Assistant`] operation. Backend failures are returned
//! as tool results with `isError` set so the client sees the message; only
//! malformed arguments become protocol errors.

use crate::mcp::protocol::{CallToolParams, CallToolResult, Tool};
use crate::mcp::server::{McpServer, ToolError, ToolHandler};
use crate::service::{AnswerOutcome, Assistant, LabelOutcome, NO_CONTEXT_DISCLAIMER};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

type Arguments = HashMap<String, Value>;

fn required_str<'a>(args: &'a Arguments, name: &str) -> Result<&'a str, ToolError> {
    match args.get(name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim()),
        Some(Value::String(_)) => Err(ToolError::InvalidArguments(format!(
            "Parameter must not be empty: {name}"
        ))),
        Some(_) => Err(ToolError::InvalidArguments(format!(
            "Parameter must be a string: {name}"
        ))),
        None => Err(ToolError::InvalidArguments(format!(
            "Missing required parameter: {name}"
        ))),
    }
}

fn optional_str<'a>(args: &'a Arguments, name: &str) -> Result<Option<&'a str>, ToolError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => required_str(args, name).map(Some),
    }
}

fn json_result<T: serde::Serialize>(
    payload: &T,
    is_error: bool,
) -> Result<CallToolResult, ToolError> {
    let mut result = CallToolResult::json(payload).map_err(anyhow::Error::from)?;
    result.is_error = Some(is_error);
    Ok(result)
}

fn backend_error(what: &str, e: &crate::RagError) -> CallToolResult {
    error!("{} failed: {}", what, e);
    CallToolResult::error(format!("{what} failed: {e}"))
}

fn question_schema(description: &str, with_language: bool) -> Value {
    let mut properties = json!({
        "question": {
            "type": "string",
            "description": description
        }
    });
    if with_language {
        properties["language"] = json!({
            "type": "string",
            "description": "Optional: Language of the answer (default from configuration)"
        });
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": ["question"],
        "additionalProperties": false
    })
}

/// Closest corpus entry for a question, without generation
pub struct GetSourcesHandler {
    assistant: Arc<Assistant>,
}

impl GetSourcesHandler {
    #[inline]
    pub fn new(assistant: Arc<Assistant>) -> Self {
        Self { assistant }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "get_sources".to_string(),
            description: Some(
                "Find the reference answer closest to a medical question".to_string(),
            ),
            input_schema: question_schema("Medical question", false),
        }
    }
}

#[async_trait]
impl ToolHandler for GetSourcesHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult, ToolError> {
        let args = params.arguments.unwrap_or_default();
        let question = required_str(&args, "question")?;
        debug!("Looking up sources for '{}'", question);

        match self.assistant.get_sources(question).await {
            Ok(Some(source)) => json_result(&source, false),
            Ok(None) => json_result(&json!({ "message": NO_CONTEXT_DISCLAIMER }), false),
            Err(e) => Ok(backend_error("Source lookup", &e)),
        }
    }
}

/// Grounded answer to a clinical question
pub struct AnswerHandler {
    assistant: Arc<Assistant>,
}

impl AnswerHandler {
    #[inline]
    pub fn new(assistant: Arc<Assistant>) -> Self {
        Self { assistant }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "answer".to_string(),
            description: Some(
                "Answer a medical question using the closest reference answer as context, \
                 with quality metrics"
                    .to_string(),
            ),
            input_schema: question_schema("Medical question", true),
        }
    }
}

#[async_trait]
impl ToolHandler for AnswerHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult, ToolError> {
        let args = params.arguments.unwrap_or_default();
        let question = required_str(&args, "question")?;
        let language = optional_str(&args, "language")?;

        match self.assistant.answer(question, language).await {
            Ok(response) => {
                let failed = matches!(response.outcome, AnswerOutcome::Failed { .. });
                json_result(&response, failed)
            }
            Err(e) => Ok(backend_error("Answer", &e)),
        }
    }
}

/// Top-N medication lookup
pub struct MedicationInfoHandler {
    assistant: Arc<Assistant>,
}

impl MedicationInfoHandler {
    #[inline]
    pub fn new(assistant: Arc<Assistant>) -> Self {
        Self { assistant }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "get_medication_info".to_string(),
            description: Some(
                "Find the medications closest to a question with their averaged similarity"
                    .to_string(),
            ),
            input_schema: question_schema("Question or medication name", false),
        }
    }
}

#[async_trait]
impl ToolHandler for MedicationInfoHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult, ToolError> {
        let args = params.arguments.unwrap_or_default();
        let question = required_str(&args, "question")?;

        match self.assistant.get_medication_info(question).await {
            Ok(Some(info)) => json_result(&info, false),
            Ok(None) => json_result(
                &json!({ "message": "No medications are available in the corpus." }),
                false,
            ),
            Err(e) => Ok(backend_error("Medication lookup", &e)),
        }
    }
}

/// Answer grounded in the closest medication sheet
pub struct AnswerMedicationHandler {
    assistant: Arc<Assistant>,
}

impl AnswerMedicationHandler {
    #[inline]
    pub fn new(assistant: Arc<Assistant>) -> Self {
        Self { assistant }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "answer_medication".to_string(),
            description: Some(
                "Answer a question about a medication using the closest drug sheet".to_string(),
            ),
            input_schema: question_schema("Question about a medication", true),
        }
    }
}

#[async_trait]
impl ToolHandler for AnswerMedicationHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult, ToolError> {
        let args = params.arguments.unwrap_or_default();
        let question = required_str(&args, "question")?;
        let language = optional_str(&args, "language")?;

        match self.assistant.answer_medication(question, language).await {
            Ok(response) => {
                let failed = matches!(response.outcome, AnswerOutcome::Failed { .. });
                json_result(&response, failed)
            }
            Err(e) => Ok(backend_error("Medication answer", &e)),
        }
    }
}

/// Correct label text into a medication name and describe it
pub struct MedicationLabelHandler {
    assistant: Arc<Assistant>,
}

impl MedicationLabelHandler {
    #[inline]
    pub fn new(assistant: Arc<Assistant>) -> Self {
        Self { assistant }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "process_medication_label".to_string(),
            description: Some(
                "Identify a medication from text read off its label and describe it".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "text": {
                        "type": "string",
                        "description": "Text extracted from the medication label"
                    },
                    "language": {
                        "type": "string",
                        "description": "Optional: Language of the description (default from configuration)"
                    }
                },
                "required": ["text"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for MedicationLabelHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult, ToolError> {
        let args = params.arguments.unwrap_or_default();
        let text = required_str(&args, "text")?;
        let language = optional_str(&args, "language")?;

        let outcome = self.assistant.process_medication_label(text, language).await;
        let failed = matches!(outcome, LabelOutcome::Error { .. });
        json_result(&outcome, failed)
    }
}

/// Drop cached corpus snapshots and reload them from storage
pub struct RefreshCorpusHandler {
    assistant: Arc<Assistant>,
}

impl RefreshCorpusHandler {
    #[inline]
    pub fn new(assistant: Arc<Assistant>) -> Self {
        Self { assistant }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "refresh_corpus".to_string(),
            description: Some("Reload corpus tables after the database changed".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table": {
                        "type": "string",
                        "description": "Optional: Only refresh this table"
                    }
                },
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for RefreshCorpusHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult, ToolError> {
        let args = params.arguments.unwrap_or_default();
        let table = optional_str(&args, "table")?;

        match self.assistant.refresh_corpus(table).await {
            Ok(refreshed) => json_result(&json!({ "refreshed": refreshed }), false),
            Err(e) => Ok(backend_error("Corpus refresh", &e)),
        }
    }
}

/// Register every assistant tool on `server`
#[inline]
pub async fn register_tools(server: &McpServer, assistant: &Arc<Assistant>) {
    server
        .register_tool(
            GetSourcesHandler::tool_definition(),
            GetSourcesHandler::new(Arc::clone(assistant)),
        )
        .await;
    server
        .register_tool(
            AnswerHandler::tool_definition(),
            AnswerHandler::new(Arc::clone(assistant)),
        )
        .await;
    server
        .register_tool(
            MedicationInfoHandler::tool_definition(),
            MedicationInfoHandler::new(Arc::clone(assistant)),
        )
        .await;
    server
        .register_tool(
            AnswerMedicationHandler::tool_definition(),
            AnswerMedicationHandler::new(Arc::clone(assistant)),
        )
        .await;
    server
        .register_tool(
            MedicationLabelHandler::tool_definition(),
            MedicationLabelHandler::new(Arc::clone(assistant)),
        )
        .await;
    server
        .register_tool(
            RefreshCorpusHandler::tool_definition(),
            RefreshCorpusHandler::new(Arc::clone(assistant)),
        )
        .await;
}
