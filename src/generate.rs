//! Streaming answer generation.
//!
//! Sends the system prompt, capped history, and one combined user turn to
//! the chat completions API with `stream: true`, and exposes the SSE
//! deltas as a plain `Stream` of text fragments. The transport layer owns
//! wire framing; this module only yields prose. The whole call is bounded
//! by the generation timeout and never retried.

use chrono::{DateTime, Utc};
use eventsource_stream::Eventsource;
use futures::{future, stream::BoxStream, StreamExt};
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::models::ChatTurn;

const SYSTEM_PROMPT: &str = "You are the site assistant for a personal portfolio and blog. \
You answer questions about the site owner's posts, projects, and background using only the \
supplied context. Be concise and specific. If the context does not contain the answer, say so \
plainly instead of guessing. Never invent titles, dates, or links.";

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("generation provider rejected the API key")]
    Authentication,
    #[error("generation provider is rate limited")]
    RateLimited,
    #[error("generation timed out")]
    Timeout,
    #[error("generation provider unavailable: {0}")]
    Unavailable(String),
}

/// Open a streaming completion for the question. Yields text fragments as
/// the model produces them; the stream ends when the provider sends its
/// terminator or closes the connection.
pub async fn stream_answer(
    config: &Config,
    question: &str,
    context: &str,
    history: &[ChatTurn],
) -> Result<BoxStream<'static, Result<String, GenerateError>>, GenerateError> {
    let api_key = config
        .secrets
        .openai_api_key
        .clone()
        .ok_or_else(|| GenerateError::Unavailable("OPENAI_API_KEY not set".to_string()))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.generation.timeout_secs))
        .build()
        .map_err(|e| GenerateError::Unavailable(e.to_string()))?;

    let messages = build_messages(config, question, context, history, Utc::now());
    let body = serde_json::json!({
        "model": config.generation.model,
        "stream": true,
        "messages": messages,
    });

    let response = client
        .post(format!(
            "{}/chat/completions",
            config.generation.base_url.trim_end_matches('/')
        ))
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                GenerateError::Timeout
            } else {
                GenerateError::Unavailable(e.to_string())
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(match status.as_u16() {
            401 | 403 => GenerateError::Authentication,
            429 => GenerateError::RateLimited,
            _ => GenerateError::Unavailable(format!("{}: {}", status, body_text)),
        });
    }

    let stream = response
        .bytes_stream()
        .eventsource()
        .take_while(|event| {
            future::ready(!matches!(event, Ok(ev) if ev.data == "[DONE]"))
        })
        .filter_map(|event| async move {
            match event {
                Ok(ev) => match serde_json::from_str::<serde_json::Value>(&ev.data) {
                    Ok(json) => delta_content(&json).filter(|s| !s.is_empty()).map(Ok),
                    // Non-JSON keep-alive noise is skipped, not fatal.
                    Err(_) => None,
                },
                Err(e) => Some(Err(GenerateError::Unavailable(e.to_string()))),
            }
        });

    Ok(stream.boxed())
}

/// System prompt, then up to `max_history_turns` most recent turns, then
/// the combined user turn.
fn build_messages(
    config: &Config,
    question: &str,
    context: &str,
    history: &[ChatTurn],
    now: DateTime<Utc>,
) -> Vec<serde_json::Value> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(serde_json::json!({
        "role": "system",
        "content": SYSTEM_PROMPT,
    }));

    let start = history
        .len()
        .saturating_sub(config.generation.max_history_turns);
    for turn in &history[start..] {
        messages.push(serde_json::json!({
            "role": turn.role,
            "content": turn.content,
        }));
    }

    messages.push(serde_json::json!({
        "role": "user",
        "content": build_user_message(question, context, now),
    }));

    messages
}

fn build_user_message(question: &str, context: &str, now: DateTime<Utc>) -> String {
    format!(
        "Current time (UTC): {}\n\n\
         Context:\n{}\n\n\
         Rules:\n\
         - Answer from the context above; do not invent content.\n\
         - When referencing a post or project, use its exact title.\n\
         - Keep answers short and direct.\n\n\
         Question: {}",
        now.format("%Y-%m-%d %H:%M:%S"),
        context,
        question
    )
}

fn delta_content(json: &serde_json::Value) -> Option<String> {
    json.get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TurnRole;

    #[test]
    fn test_user_message_sections_in_order() {
        let now = DateTime::parse_from_rfc3339("2024-06-01T10:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let msg = build_user_message("what is this?", "[Title] A", now);

        assert!(msg.starts_with("Current time (UTC): 2024-06-01 10:30:00"));
        let ctx = msg.find("Context:\n[Title] A").unwrap();
        let rules = msg.find("Rules:").unwrap();
        let question = msg.find("Question: what is this?").unwrap();
        assert!(ctx < rules && rules < question);
    }

    #[test]
    fn test_history_capped_to_most_recent_turns() {
        let mut config = Config::default();
        config.generation.max_history_turns = 4;

        let history: Vec<ChatTurn> = (0..10)
            .map(|i| ChatTurn {
                role: if i % 2 == 0 {
                    TurnRole::User
                } else {
                    TurnRole::Assistant
                },
                content: format!("turn {}", i),
            })
            .collect();

        let messages = build_messages(&config, "q", "ctx", &history, Utc::now());
        // system + 4 history + combined user turn
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[1]["content"], "turn 6");
        assert_eq!(messages[4]["content"], "turn 9");
    }

    #[test]
    fn test_delta_content_extraction() {
        let json = serde_json::json!({
            "choices": [{"delta": {"content": "Hello"}}]
        });
        assert_eq!(delta_content(&json), Some("Hello".to_string()));
    }

    #[test]
    fn test_delta_content_absent_on_finish_chunk() {
        let json = serde_json::json!({
            "choices": [{"delta": {}, "finish_reason": "stop"}]
        });
        assert_eq!(delta_content(&json), None);
    }

    #[test]
    fn test_roles_serialize_lowercase() {
        let config = Config::default();
        let history = vec![ChatTurn {
            role: TurnRole::Assistant,
            content: "hi".to_string(),
        }];
        let messages = build_messages(&config, "q", "ctx", &history, Utc::now());
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[2]["role"], "user");
    }
}
