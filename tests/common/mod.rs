//! Stub HTTP services for client contract tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

pub const OPENAI_KEY: &str = "sk-test";
pub const ELEVENLABS_KEY: &str = "xi-test";

pub const CORNBREAD_EXTRACT: &str = "Cornbread is a quick bread made with cornmeal. \
It became a staple by 1945 [3]. Recipes vary widely; some add sugar.\n\n\n\
== History ==\nNative peoples ground maize long before settlers arrived. \
Settlers adopted the grain quickly.\n\n\
=== Regional styles ===\nSouthern cornbread is rarely sweet.\n\n\
== See also ==\nJohnnycake\n\n\
== References ==\nSmith, J. (1999). Corn.";

/// Requests seen by a stub, in arrival order.
#[derive(Clone, Default)]
pub struct Hits {
    inner: Arc<Mutex<Vec<String>>>,
}

impl Hits {
    pub fn push(&self, hit: impl Into<String>) {
        self.inner.lock().unwrap().push(hit.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.inner.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.all().iter().filter(|h| h.starts_with(prefix)).count()
    }
}

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// A base URL nothing is listening on.
pub async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

// --- MediaWiki ---

pub fn mediawiki(hits: Hits) -> Router {
    Router::new()
        .route("/w/api.php", get(mediawiki_query))
        .with_state(hits)
}

async fn mediawiki_query(
    State(hits): State<Hits>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let title = params.get("titles").cloned().unwrap_or_default();
    hits.push(format!("wiki:{title}"));

    if title != "Cornbread" {
        return Json(json!({
            "batchcomplete": true,
            "query": {"pages": [{"ns": 0, "title": title, "missing": true}]}
        }));
    }

    let mut page = json!({"pageid": 7329, "ns": 0, "title": "Cornbread"});
    if params.get("prop").map(String::as_str) == Some("extracts") {
        page["extract"] = json!(CORNBREAD_EXTRACT);
    }
    Json(json!({"batchcomplete": true, "query": {"pages": [page]}}))
}

// --- Rewriters ---

/// Spells out the one numeral the fixtures use, like a model that
/// forgets to drop citation markers.
fn spell_numbers(text: &str) -> String {
    text.replace("1945", "nineteen forty-five")
        .replace("1999", "nineteen ninety-nine")
}

pub fn openai(hits: Hits) -> Router {
    Router::new()
        .route("/chat/completions", post(chat_completions))
        .with_state(hits)
}

async fn chat_completions(
    State(hits): State<Hits>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let expected = format!("Bearer {OPENAI_KEY}");
    let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
    if auth != Some(expected.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"message": "Incorrect API key provided"}})),
        )
            .into_response();
    }

    let text = body["messages"][1]["content"].as_str().unwrap_or_default();
    hits.push(format!("openai:{}", body["model"].as_str().unwrap_or_default()));

    Json(json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": spell_numbers(text)},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 120, "completion_tokens": 80, "total_tokens": 200}
    }))
    .into_response()
}

pub fn ollama(hits: Hits) -> Router {
    Router::new()
        .route("/api/generate", post(ollama_generate))
        .with_state(hits)
}

async fn ollama_generate(State(hits): State<Hits>, Json(body): Json<Value>) -> Json<Value> {
    let prompt = body["prompt"].as_str().unwrap_or_default();
    hits.push(format!("ollama:{}", body["model"].as_str().unwrap_or_default()));

    let text = prompt
        .split_once("Text:\n")
        .and_then(|(_, rest)| rest.rsplit_once("\n\nProcessed:"))
        .map(|(text, _)| text)
        .unwrap_or_default();

    Json(json!({
        "model": body["model"],
        "response": spell_numbers(text),
        "done": true,
        "prompt_eval_count": 300,
        "eval_count": 90
    }))
}

// --- ElevenLabs ---

#[derive(Clone, Default)]
pub struct SpeechStub {
    pub hits: Hits,
    /// 1-based synthesis call that answers with a server error.
    pub fail_on_call: Option<usize>,
    pub character_count: u64,
    pub character_limit: u64,
}

pub fn elevenlabs(stub: SpeechStub) -> Router {
    Router::new()
        .route("/v1/text-to-speech/{voice_id}", post(text_to_speech))
        .route("/v1/user/subscription", get(subscription))
        .with_state(stub)
}

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("xi-api-key").and_then(|v| v.to_str().ok()) == Some(ELEVENLABS_KEY)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"detail": {"status": "invalid_api_key"}})),
    )
        .into_response()
}

async fn text_to_speech(
    State(stub): State<SpeechStub>,
    Path(voice_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let Some(rate) = params
        .get("output_format")
        .and_then(|f| f.strip_prefix("pcm_"))
        .and_then(|r| r.parse::<usize>().ok())
    else {
        return (StatusCode::BAD_REQUEST, "unsupported output_format").into_response();
    };

    let text = body["text"].as_str().unwrap_or_default();
    stub.hits.push(format!("tts:{voice_id}:{text}"));
    if stub.fail_on_call == Some(stub.hits.count("tts:")) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "synthesis failed").into_response();
    }

    // 0.1 s of 16-bit mono silence
    (StatusCode::OK, vec![0u8; rate / 10 * 2]).into_response()
}

async fn subscription(State(stub): State<SpeechStub>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    stub.hits.push("subscription");
    Json(json!({
        "tier": "starter",
        "character_count": stub.character_count,
        "character_limit": stub.character_limit
    }))
    .into_response()
}
