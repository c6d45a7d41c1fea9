//! Stream transcoder
//!
//! Converts each provider's incremental wire encoding into the
//! canonical event stream. Network chunks do not align with logical
//! event boundaries, so every decoder buffers partial lines across
//! reads. A malformed chunk is skipped with a warning - total-stream
//! integrity takes priority over single-chunk fidelity - and every
//! canonical stream ends with exactly one `Done`, even when the
//! provider closes without its own end sentinel.

use async_stream::stream;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use openadvisor_types::{StreamEvent, ToolCallFragment};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::providers::{ByteStream, WireFamily};

/// Buffers partial line fragments across read boundaries
#[derive(Default)]
struct LineBuffer {
    buf: String,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
    }

    fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.find('\n')?;
        let line = self.buf[..pos].trim_end_matches('\r').to_string();
        self.buf.drain(..=pos);
        Some(line)
    }
}

/// Extract the payload of a `data:` line; comments, heartbeats, and
/// `event:` lines yield nothing
fn data_payload(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    line.strip_prefix("data:").map(str::trim_start)
}

/// Normalize a provider byte stream into canonical events
pub fn transcode(bytes: ByteStream, family: WireFamily) -> BoxStream<'static, StreamEvent> {
    match family {
        WireFamily::DeltaObject => delta_object(bytes).boxed(),
        WireFamily::TypedEvent => typed_event(bytes).boxed(),
        WireFamily::CandidateObject => candidate_object(bytes).boxed(),
    }
}

// ============================================================================
// Delta-object family (OpenAI-shaped)
// ============================================================================

#[derive(Deserialize)]
struct DeltaChunk {
    #[serde(default)]
    choices: Vec<DeltaChoice>,
}

#[derive(Deserialize)]
struct DeltaChoice {
    #[serde(default)]
    delta: DeltaPayload,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct DeltaPayload {
    content: Option<String>,
    tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Deserialize)]
struct DeltaToolCall {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<DeltaFunction>,
}

#[derive(Deserialize)]
struct DeltaFunction {
    name: Option<String>,
    arguments: Option<String>,
}

fn delta_object(mut bytes: ByteStream) -> impl Stream<Item = StreamEvent> {
    stream! {
        let mut buffer = LineBuffer::default();
        let mut finish_reason: Option<String> = None;

        'read: while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(error = %e, "provider stream failed mid-flight, truncating");
                    break 'read;
                }
            };
            buffer.push(&chunk);

            while let Some(line) = buffer.next_line() {
                let Some(data) = data_payload(&line) else { continue };
                if data == "[DONE]" {
                    break 'read;
                }
                let parsed: DeltaChunk = match serde_json::from_str(data) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(error = %e, "skipping undecodable chunk");
                        continue;
                    }
                };
                let Some(choice) = parsed.choices.into_iter().next() else { continue };
                if let Some(reason) = choice.finish_reason {
                    finish_reason = Some(reason);
                }
                if let Some(text) = choice.delta.content {
                    if !text.is_empty() {
                        yield StreamEvent::Delta { text };
                    }
                }
                for call in choice.delta.tool_calls.unwrap_or_default() {
                    let function = call.function;
                    yield StreamEvent::ToolCall {
                        fragment: ToolCallFragment {
                            index: call.index,
                            id: call.id,
                            name: function.as_ref().and_then(|f| f.name.clone()),
                            arguments: function.and_then(|f| f.arguments),
                        },
                    };
                }
            }
        }

        yield StreamEvent::Done { finish_reason };
    }
}

// ============================================================================
// Typed-event family (Anthropic)
// ============================================================================

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TypedWireEvent {
    MessageStart,
    Ping,
    ContentBlockStart {
        index: u32,
        content_block: TypedContentBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: TypedBlockDelta,
    },
    ContentBlockStop,
    MessageDelta {
        delta: TypedMessageDelta,
        usage: Option<TypedUsage>,
    },
    MessageStop,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TypedContentBlock {
    Text,
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TypedBlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct TypedMessageDelta {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct TypedUsage {
    output_tokens: Option<u64>,
}

fn typed_event(mut bytes: ByteStream) -> impl Stream<Item = StreamEvent> {
    stream! {
        let mut buffer = LineBuffer::default();
        let mut finish_reason: Option<String> = None;
        // per-stream observability state; non-content events land
        // here instead of the canonical stream
        let mut seen_first_token = false;
        let mut tool_name: Option<String> = None;
        let mut output_tokens: u64 = 0;

        'read: while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(error = %e, "provider stream failed mid-flight, truncating");
                    break 'read;
                }
            };
            buffer.push(&chunk);

            while let Some(line) = buffer.next_line() {
                let Some(data) = data_payload(&line) else { continue };
                let event: TypedWireEvent = match serde_json::from_str(data) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "skipping undecodable chunk");
                        continue;
                    }
                };
                match event {
                    TypedWireEvent::ContentBlockDelta { index, delta } => match delta {
                        TypedBlockDelta::TextDelta { text } => {
                            if !seen_first_token {
                                seen_first_token = true;
                                debug!("first token received");
                            }
                            yield StreamEvent::Delta { text };
                        }
                        TypedBlockDelta::InputJsonDelta { partial_json } => {
                            yield StreamEvent::ToolCall {
                                fragment: ToolCallFragment {
                                    index,
                                    id: None,
                                    name: None,
                                    arguments: Some(partial_json),
                                },
                            };
                        }
                        TypedBlockDelta::Other => {}
                    },
                    TypedWireEvent::ContentBlockStart { index, content_block } => {
                        if let TypedContentBlock::ToolUse { id, name } = content_block {
                            tool_name = Some(name.clone());
                            yield StreamEvent::ToolCall {
                                fragment: ToolCallFragment {
                                    index,
                                    id: Some(id),
                                    name: Some(name),
                                    arguments: None,
                                },
                            };
                        }
                    }
                    TypedWireEvent::MessageDelta { delta, usage } => {
                        if let Some(reason) = delta.stop_reason {
                            finish_reason = Some(reason);
                        }
                        if let Some(tokens) = usage.and_then(|u| u.output_tokens) {
                            output_tokens = tokens;
                        }
                    }
                    TypedWireEvent::MessageStop => {
                        break 'read;
                    }
                    TypedWireEvent::MessageStart
                    | TypedWireEvent::Ping
                    | TypedWireEvent::ContentBlockStop
                    | TypedWireEvent::Unknown => {}
                }
            }
        }

        debug!(
            output_tokens,
            tool = tool_name.as_deref().unwrap_or(""),
            "typed-event stream finished"
        );
        yield StreamEvent::Done { finish_reason };
    }
}

// ============================================================================
// Candidate-object family (Gemini)
// ============================================================================

#[derive(Deserialize)]
struct CandidateChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

fn candidate_object(mut bytes: ByteStream) -> impl Stream<Item = StreamEvent> {
    stream! {
        let mut buffer = LineBuffer::default();
        let mut finish_reason: Option<String> = None;

        'read: while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(error = %e, "provider stream failed mid-flight, truncating");
                    break 'read;
                }
            };
            buffer.push(&chunk);

            while let Some(line) = buffer.next_line() {
                let Some(data) = data_payload(&line) else { continue };
                let parsed: CandidateChunk = match serde_json::from_str(data) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(error = %e, "skipping undecodable chunk");
                        continue;
                    }
                };
                let Some(candidate) = parsed.candidates.into_iter().next() else { continue };
                if let Some(reason) = candidate.finish_reason {
                    finish_reason = Some(reason);
                }
                for part in candidate.content.into_iter().flat_map(|c| c.parts) {
                    if let Some(text) = part.text {
                        if !text.is_empty() {
                            yield StreamEvent::Delta { text };
                        }
                    }
                }
            }
        }

        yield StreamEvent::Done { finish_reason };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;

    fn byte_stream(chunks: Vec<&str>) -> ByteStream {
        let owned: Vec<openadvisor_types::Result<Bytes>> = chunks
            .into_iter()
            .map(|c| Ok(Bytes::from(c.to_string())))
            .collect();
        stream::iter(owned).boxed()
    }

    async fn collect(bytes: ByteStream, family: WireFamily) -> Vec<StreamEvent> {
        transcode(bytes, family).collect().await
    }

    fn joined_text(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Delta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_delta_concatenation_reconstructs_text() {
        let chunks = vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"Div\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ersify \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"broadly.\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ];
        let events = collect(byte_stream(chunks), WireFamily::DeltaObject).await;
        assert_eq!(joined_text(&events), "Diversify broadly.");
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Done {
                finish_reason: Some("stop".to_string())
            })
        );
    }

    #[tokio::test]
    async fn test_lines_split_across_read_boundaries() {
        // one logical event split over three network chunks
        let chunks = vec![
            "data: {\"choices\":[{\"del",
            "ta\":{\"content\":\"hel",
            "lo\"}}]}\ndata: [DONE]\n",
        ];
        let events = collect(byte_stream(chunks), WireFamily::DeltaObject).await;
        assert_eq!(joined_text(&events), "hello");
    }

    #[tokio::test]
    async fn test_malformed_middle_chunk_is_skipped() {
        let chunks = vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"before \"}}]}\n",
            "data: {not json at all\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"after\"}}]}\n",
            "data: [DONE]\n",
        ];
        let events = collect(byte_stream(chunks), WireFamily::DeltaObject).await;
        assert_eq!(joined_text(&events), "before after");
        assert!(events.last().unwrap().is_done());
    }

    #[tokio::test]
    async fn test_missing_done_sentinel_still_terminates() {
        let chunks = vec!["data: {\"choices\":[{\"delta\":{\"content\":\"cut\"}}]}\n"];
        let events = collect(byte_stream(chunks), WireFamily::DeltaObject).await;
        assert_eq!(joined_text(&events), "cut");
        assert!(events.last().unwrap().is_done());
    }

    #[tokio::test]
    async fn test_heartbeats_and_comments_ignored() {
        let chunks = vec![
            ": keep-alive\n",
            "\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
            ": ping\n",
            "data: [DONE]\n",
        ];
        let events = collect(byte_stream(chunks), WireFamily::DeltaObject).await;
        assert_eq!(events.len(), 2); // one delta, one done
        assert_eq!(joined_text(&events), "ok");
    }

    #[tokio::test]
    async fn test_mid_stream_transport_error_truncates_gracefully() {
        let chunks: Vec<openadvisor_types::Result<Bytes>> = vec![
            Ok(Bytes::from(
                "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n",
            )),
            Err(openadvisor_types::GatewayError::Network {
                provider: openadvisor_types::ProviderKind::OpenAi,
                message: "connection reset".to_string(),
            }),
        ];
        let events = collect(stream::iter(chunks).boxed(), WireFamily::DeltaObject).await;
        assert_eq!(joined_text(&events), "partial");
        assert!(events.last().unwrap().is_done());
    }

    #[tokio::test]
    async fn test_typed_event_stream() {
        let chunks = vec![
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\"}}\n",
            "event: ping\ndata: {\"type\":\"ping\"}\n",
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":2}}\n",
            "data: {\"type\":\"message_stop\"}\n",
        ];
        let events = collect(byte_stream(chunks), WireFamily::TypedEvent).await;
        assert_eq!(joined_text(&events), "Hello");
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Done {
                finish_reason: Some("end_turn".to_string())
            })
        );
        // message_start/ping/content_block_start are not forwarded
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn test_typed_event_tool_use() {
        let chunks = vec![
            "data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"tu_1\",\"name\":\"get_quote\"}}\n",
            "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"sym\"}}\n",
            "data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"bol\\\":\\\"VTI\\\"}\"}}\n",
            "data: {\"type\":\"message_stop\"}\n",
        ];
        let events = collect(byte_stream(chunks), WireFamily::TypedEvent).await;

        let fragments: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCall { fragment } => Some(fragment),
                _ => None,
            })
            .collect();
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].name.as_deref(), Some("get_quote"));
        assert_eq!(fragments[0].id.as_deref(), Some("tu_1"));
        let args: String = fragments
            .iter()
            .filter_map(|f| f.arguments.as_deref())
            .collect();
        assert_eq!(args, "{\"symbol\":\"VTI\"}");
    }

    #[tokio::test]
    async fn test_candidate_object_stream() {
        let chunks = vec![
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Bonds \"}]}}]}\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"are loans.\"}]},\"finishReason\":\"STOP\"}]}\n",
        ];
        let events = collect(byte_stream(chunks), WireFamily::CandidateObject).await;
        assert_eq!(joined_text(&events), "Bonds are loans.");
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Done {
                finish_reason: Some("STOP".to_string())
            })
        );
    }

    #[tokio::test]
    async fn test_exactly_one_terminal_event() {
        let chunks = vec!["data: [DONE]\n", "data: [DONE]\n"];
        let events = collect(byte_stream(chunks), WireFamily::DeltaObject).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_done());
    }
}
