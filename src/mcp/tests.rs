//! MCP server and tool tests over an in-memory transport

use super::protocol::*;
use super::*;
use crate::config::RetrievalConfig;
use crate::corpus::CorpusCache;
use crate::embeddings::HashEmbedder;
use crate::service::Assistant;
use crate::test_support::{MemorySource, ScriptedGenerator, medication_row, qa_row};
use serde_json::{Value, json};
use std::sync::Arc;

const IBUPROFEN_QUESTION: &str = "What is the recommended dosage of ibuprofen for adults?";

fn assistant(generator: ScriptedGenerator) -> Arc<Assistant> {
    let embedder = Arc::new(HashEmbedder::new(256));
    let source = MemorySource::default()
        .with_table(
            "qa_corpus",
            vec![
                qa_row(
                    embedder.as_ref(),
                    IBUPROFEN_QUESTION,
                    "Adults may take 200 to 400 mg every 4 to 6 hours.",
                ),
                qa_row(
                    embedder.as_ref(),
                    "How is asthma treated?",
                    "Inhaled corticosteroids and bronchodilators.",
                ),
            ],
        )
        .with_table(
            "medication_corpus",
            vec![
                medication_row(embedder.as_ref(), "Ibuprofen", "pain fever"),
                medication_row(embedder.as_ref(), "Metformin", "type 2 diabetes"),
            ],
        );

    Arc::new(Assistant::new(
        embedder,
        Arc::new(generator),
        Arc::new(CorpusCache::new(Arc::new(source))),
        RetrievalConfig::default(),
    ))
}

async fn server(generator: ScriptedGenerator) -> Arc<McpServer> {
    let server = McpServer::new("med-rag".to_string(), "0.0.1".to_string());
    register_tools(&server, &assistant(generator)).await;
    Arc::new(server)
}

async fn exchange(server: Arc<McpServer>, messages: &[Value]) -> Vec<Value> {
    let input = messages
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    let mut output = Vec::new();
    server
        .serve(input.as_bytes(), &mut output)
        .await
        .expect("in-memory transport does not fail");

    String::from_utf8(output)
        .expect("utf-8 output")
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line is JSON"))
        .collect()
}

fn call(id: i64, name: &str, arguments: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": { "name": name, "arguments": arguments }
    })
}

fn tool_payload(response: &Value) -> Value {
    let text = response["result"]["content"][0]["text"]
        .as_str()
        .expect("text content");
    serde_json::from_str(text).expect("tool text is JSON")
}

#[tokio::test]
async fn initialize_handshake() {
    let server = server(ScriptedGenerator::replying("unused")).await;
    let responses = exchange(
        Arc::clone(&server),
        &[
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {
                    "protocolVersion": MCP_VERSION,
                    "capabilities": {},
                    "clientInfo": { "name": "test-client", "version": "1.0" }
                }
            }),
            json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
            json!({ "jsonrpc": "2.0", "id": 2, "method": "ping" }),
        ],
    )
    .await;

    // the notification gets no reply
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["id"], 1);
    assert_eq!(responses[0]["result"]["protocolVersion"], MCP_VERSION);
    assert_eq!(responses[0]["result"]["serverInfo"]["name"], "med-rag");
    assert!(responses[0]["result"]["capabilities"]["tools"].is_object());
    assert_eq!(responses[1]["result"], json!({}));
    assert_eq!(
        server.connection_state().await,
        server::ConnectionState::Closed
    );
}

#[tokio::test]
async fn unsupported_protocol_version() {
    let server = server(ScriptedGenerator::replying("unused")).await;
    let responses = exchange(
        server,
        &[json!({
            "jsonrpc": "2.0",
            "id": "init",
            "method": "initialize",
            "params": {
                "protocolVersion": "1999-01-01",
                "capabilities": {},
                "clientInfo": { "name": "old-client", "version": "0.1" }
            }
        })],
    )
    .await;

    assert_eq!(responses[0]["id"], "init");
    assert_eq!(
        responses[0]["error"]["code"],
        mcp_error_codes::INVALID_PROTOCOL_VERSION
    );
}

#[tokio::test]
async fn lists_tools_sorted() {
    let server = server(ScriptedGenerator::replying("unused")).await;
    let responses = exchange(
        server,
        &[json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" })],
    )
    .await;

    let names: Vec<&str> = responses[0]["result"]["tools"]
        .as_array()
        .expect("tools array")
        .iter()
        .map(|tool| tool["name"].as_str().expect("tool name"))
        .collect();
    assert_eq!(
        names,
        vec![
            "answer",
            "answer_medication",
            "get_medication_info",
            "get_sources",
            "process_medication_label",
            "refresh_corpus",
        ]
    );
}

#[tokio::test]
async fn malformed_messages() {
    let server = server(ScriptedGenerator::replying("unused")).await;

    let mut output = Vec::new();
    Arc::clone(&server)
        .serve(
            "not json\n{\"jsonrpc\":\"1.0\",\"id\":1,\"method\":\"ping\"}\n".as_bytes(),
            &mut output,
        )
        .await
        .expect("serve");
    let responses: Vec<Value> = String::from_utf8(output)
        .expect("utf-8")
        .lines()
        .map(|line| serde_json::from_str(line).expect("json"))
        .collect();

    assert_eq!(responses[0]["error"]["code"], error_codes::PARSE_ERROR);
    assert_eq!(responses[1]["error"]["code"], error_codes::INVALID_REQUEST);

    let responses = exchange(
        server,
        &[json!({ "jsonrpc": "2.0", "id": 3, "method": "resources/list" })],
    )
    .await;
    assert_eq!(responses[0]["error"]["code"], error_codes::METHOD_NOT_FOUND);
}

#[tokio::test]
async fn get_sources_tool() {
    let server = server(ScriptedGenerator::replying("unused")).await;
    let responses = exchange(
        server,
        &[
            call(1, "get_sources", json!({ "question": IBUPROFEN_QUESTION })),
            call(2, "get_sources", json!({ "question": "zzz qqq xxx" })),
        ],
    )
    .await;

    let found = tool_payload(&responses[0]);
    assert_eq!(
        found["answer"],
        "Adults may take 200 to 400 mg every 4 to 6 hours."
    );
    assert!(found["similarity"].as_f64().expect("similarity") > 0.99);

    let missing = tool_payload(&responses[1]);
    assert_eq!(missing["message"], crate::service::NO_CONTEXT_DISCLAIMER);
    assert_eq!(responses[1]["result"]["isError"], false);
}

#[tokio::test]
async fn answer_tool_reports_outcome() {
    let server = server(ScriptedGenerator::replying("Take 200 to 400 mg.")).await;
    let responses = exchange(
        server,
        &[call(
            7,
            "answer",
            json!({ "question": IBUPROFEN_QUESTION, "language": "spanish" }),
        )],
    )
    .await;

    assert_eq!(responses[0]["id"], 7);
    assert_eq!(responses[0]["result"]["isError"], false);
    let payload = tool_payload(&responses[0]);
    assert_eq!(payload["outcome"]["status"], "grounded");
    assert_eq!(payload["outcome"]["answer"], "Take 200 to 400 mg.");
    assert!(payload["response_time"].is_number());
}

#[tokio::test]
async fn generation_failure_is_a_tool_error() {
    let server = server(ScriptedGenerator::failing("connection refused")).await;
    let responses = exchange(
        server,
        &[call(1, "answer", json!({ "question": IBUPROFEN_QUESTION }))],
    )
    .await;

    assert!(responses[0]["error"].is_null());
    assert_eq!(responses[0]["result"]["isError"], true);
    assert_eq!(tool_payload(&responses[0])["outcome"]["status"], "failed");
}

#[tokio::test]
async fn invalid_arguments_and_unknown_tools() {
    let server = server(ScriptedGenerator::replying("unused")).await;
    let responses = exchange(
        server,
        &[
            call(1, "answer", json!({})),
            call(2, "answer", json!({ "question": 42 })),
            call(3, "answer", json!({ "question": "   " })),
            call(4, "search_docs", json!({ "query": "x" })),
        ],
    )
    .await;

    for response in &responses[..3] {
        assert_eq!(response["error"]["code"], error_codes::INVALID_PARAMS);
    }
    assert!(
        responses[0]["error"]["message"]
            .as_str()
            .expect("message")
            .contains("question")
    );
    assert_eq!(
        responses[3]["error"]["code"],
        mcp_error_codes::TOOL_NOT_FOUND
    );
}

#[tokio::test]
async fn medication_tools() {
    let server = server(ScriptedGenerator::new(|prompt| {
        if prompt.contains("**Extracted Medication Name:**") {
            Ok("Ibuprofen".to_string())
        } else {
            Ok("A pain reliever.".to_string())
        }
    }))
    .await;

    let responses = exchange(
        server,
        &[
            call(1, "get_medication_info", json!({ "question": "ibuprofen for pain" })),
            call(2, "process_medication_label", json!({ "text": "lbuprofen 200mg" })),
            call(3, "process_medication_label", json!({ "text": "" })),
        ],
    )
    .await;

    let info = tool_payload(&responses[0]);
    assert_eq!(info["top_matches"].as_array().expect("matches").len(), 2);
    assert_eq!(info["top_matches"][0]["drug"], "Ibuprofen");

    let label = tool_payload(&responses[1]);
    assert_eq!(label["status"], "success");
    assert_eq!(label["corrected_name"], "Ibuprofen");
    assert_eq!(label["medication_info"], "A pain reliever.");

    assert_eq!(responses[2]["error"]["code"], error_codes::INVALID_PARAMS);
}

#[tokio::test]
async fn refresh_corpus_tool() {
    let server = server(ScriptedGenerator::replying("unused")).await;
    let responses = exchange(
        server,
        &[
            call(1, "refresh_corpus", json!({})),
            call(2, "refresh_corpus", json!({ "table": "qa_corpus" })),
        ],
    )
    .await;

    let all = tool_payload(&responses[0]);
    assert_eq!(all["refreshed"].as_array().expect("tables").len(), 2);
    assert_eq!(all["refreshed"][0]["table"], "qa_corpus");
    assert_eq!(all["refreshed"][0]["loaded"], 2);

    let one = tool_payload(&responses[1]);
    assert_eq!(one["refreshed"].as_array().expect("tables").len(), 1);
}

#[test]
fn tool_definitions_require_inputs() {
    let answer = tools::AnswerHandler::tool_definition();
    assert_eq!(answer.input_schema["required"], json!(["question"]));
    assert!(answer.input_schema["properties"]["language"].is_object());

    let sources = tools::GetSourcesHandler::tool_definition();
    assert!(sources.input_schema["properties"]["language"].is_null());

    let label = tools::MedicationLabelHandler::tool_definition();
    assert_eq!(label.input_schema["required"], json!(["text"]));

    let refresh = tools::RefreshCorpusHandler::tool_definition();
    assert!(refresh.input_schema["required"].is_null());
}

#[test]
fn message_classification() {
    let request = JsonRpcMessage::from_value(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}));
    assert!(matches!(request, Some(JsonRpcMessage::Request(_))));

    let notification =
        JsonRpcMessage::from_value(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}));
    assert!(matches!(notification, Some(JsonRpcMessage::Notification(_))));

    let response = JsonRpcMessage::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": {}}));
    assert!(matches!(response, Some(JsonRpcMessage::Response(_))));

    assert!(JsonRpcMessage::from_value(json!([1, 2])).is_none());
    assert!(JsonRpcMessage::from_value(json!({"jsonrpc": "2.0"})).is_none());
}
