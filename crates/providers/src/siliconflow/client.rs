use crate::siliconflow::config::SiliconFlowConfig;
use docent_core::chat::{
    CancelToken, ChatDelta, ChatError, ChatOpts, ChatStream, Message, ModelClient, ProgressFn,
};
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Returned in place of an empty completion so callers always get text.
pub const NO_ANSWER_FALLBACK: &str = "抱歉，我无法回答这个问题。";

#[derive(Clone)]
pub struct SiliconFlowClient {
    http: Client,
    cfg: SiliconFlowConfig,
}

impl SiliconFlowClient {
    pub fn new(cfg: SiliconFlowConfig) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", cfg.api_key))?,
        );
        let mut builder = Client::builder()
            .default_headers(headers)
            .use_rustls_tls()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .timeout(cfg.timeout);
        if let Some(p) = &cfg.proxy {
            builder = builder.proxy(reqwest::Proxy::all(p)?);
        }
        let http = builder.build()?;
        Ok(Self { http, cfg })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.cfg.base_url.trim_end_matches('/')
        )
    }
}

/// Wire request body for `POST /chat/completions`. Pure; the stream flag is
/// decided by the entry point, not by the caller's data.
pub fn build_request_body(msgs: &[Message], opts: &ChatOpts, stream: bool) -> serde_json::Value {
    serde_json::json!({
        "model": opts.model,
        "messages": msgs,
        "temperature": opts.temperature,
        "max_tokens": opts.max_tokens,
        "stream": stream,
    })
}

#[allow(async_fn_in_trait)]
impl ModelClient for SiliconFlowClient {
    async fn send_chat(
        &self,
        msgs: &[Message],
        opts: &ChatOpts,
        cancel: &CancelToken,
    ) -> Result<String, ChatError> {
        if cancel.is_canceled() {
            return Err(ChatError::Canceled);
        }
        let url = self.endpoint();
        debug!(target:"providers::siliconflow","send chat model={} url={}", opts.model, url);
        let body = build_request_body(msgs, opts, false);
        // Dropping the send future on cancel aborts the in-flight request.
        let resp = tokio::select! {
            r = self.http.post(&url).json(&body).send() => {
                r.map_err(|e| normalize_canceled(map_reqwest_err(e), cancel))?
            }
            _ = wait_canceled(cancel) => return Err(ChatError::Canceled),
        };
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.ok();
            return Err(map_status_err(status, text.as_deref()));
        }
        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChatError::Malformed(e.to_string()))?;
        let text = v["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("");
        if text.is_empty() {
            warn!(target:"providers::siliconflow","completion had no content, using fallback text");
            return Ok(NO_ANSWER_FALLBACK.to_string());
        }
        Ok(text.to_string())
    }

    async fn stream_chat(
        &self,
        msgs: &[Message],
        opts: &ChatOpts,
        cancel: &CancelToken,
        on_progress: ProgressFn<'_>,
    ) -> Result<String, ChatError> {
        if cancel.is_canceled() {
            return Err(ChatError::Canceled);
        }
        let url = self.endpoint();
        info!(target:"providers::siliconflow","start chat stream model={} url={}", opts.model, url);
        let body = build_request_body(msgs, opts, true);
        let resp = tokio::select! {
            r = self.http.post(&url).json(&body).send() => {
                r.map_err(|e| normalize_canceled(map_reqwest_err(e), cancel))?
            }
            _ = wait_canceled(cancel) => return Err(ChatError::Canceled),
        };
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.ok();
            return Err(map_status_err(status, text.as_deref()));
        }

        // The response stream is owned by this call and dropped on every exit
        // path, so the connection is released on completion, cancel or error.
        let mut deltas = sse_delta_stream(resp, self.cfg.stream_idle_timeout, cancel.clone());
        let mut acc = String::new();
        loop {
            if cancel.is_canceled() {
                return Err(ChatError::Canceled);
            }
            match deltas.next().await {
                Some(Ok(ChatDelta::Text(t))) => {
                    acc.push_str(&t);
                    if cancel.is_canceled() {
                        return Err(ChatError::Canceled);
                    }
                    notify_progress(on_progress, &acc);
                }
                Some(Ok(ChatDelta::Finish(_))) => break,
                Some(Err(e)) => return Err(normalize_canceled(e, cancel)),
                None => break,
            }
        }
        if acc.is_empty() {
            Ok(NO_ANSWER_FALLBACK.to_string())
        } else {
            Ok(acc)
        }
    }
}

/// Sinks are caller code; a panicking sink must not kill the decode loop.
fn notify_progress(on_progress: ProgressFn<'_>, text: &str) {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| on_progress(text)));
    if outcome.is_err() {
        warn!(target:"providers::siliconflow","progress sink panicked, continuing decode");
    }
}

/// Resolves only once the token signals; gives `tokio::select!` a way to
/// interrupt transport awaits that the token cannot wake by itself.
async fn wait_canceled(cancel: &CancelToken) {
    while !cancel.is_canceled() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn sse_delta_stream(resp: reqwest::Response, idle: Duration, cancel: CancelToken) -> ChatStream {
    let mut stream = resp.bytes_stream();
    let s = async_stream::stream! {
        let mut buf = bytes::BytesMut::new();
        let mut last = Instant::now();
        'outer: loop {
            tokio::select! {
                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(b)) => {
                            buf.extend_from_slice(&b);
                            last = Instant::now();
                            while let Some(pos) = find_event_boundary(&buf) {
                                let ev = buf.split_to(pos).freeze();
                                let _ = if buf.starts_with(b"\r\n\r\n") { buf.split_to(4) } else { buf.split_to(2) };
                                match parse_sse_event(&ev) {
                                    Some(d @ ChatDelta::Finish(_)) => { yield Ok(d); break 'outer; }
                                    Some(d) => { yield Ok(d); }
                                    None => {}
                                }
                            }
                        }
                        Some(Err(e)) => { yield Err(map_reqwest_err(e)); break 'outer; }
                        None => { break 'outer; }
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(500)) => {
                    if cancel.is_canceled() { yield Err(ChatError::Canceled); break 'outer; }
                    if last.elapsed() > idle { yield Err(ChatError::Timeout("stream idle".into())); break 'outer; }
                }
            }
        }
    };
    Box::pin(s)
}

fn find_event_boundary(buf: &bytes::BytesMut) -> Option<usize> {
    if let Some(p) = twoway::find_bytes(buf, b"\r\n\r\n") {
        return Some(p);
    }
    twoway::find_bytes(buf, b"\n\n")
}

/// One SSE event to at most one delta. Malformed frames are skipped, never
/// fatal to the surrounding decode.
fn parse_sse_event(ev: &bytes::Bytes) -> Option<ChatDelta> {
    let s = match std::str::from_utf8(ev) {
        Ok(s) => s,
        Err(e) => {
            warn!(target:"providers::siliconflow","skipping non-utf8 frame: {}", e);
            return None;
        }
    };
    let mut data_lines = Vec::new();
    for line in s.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        }
    }
    if data_lines.is_empty() {
        return None;
    }
    if data_lines.len() == 1 && data_lines[0] == "[DONE]" {
        return Some(ChatDelta::Finish(None));
    }
    let json_text = data_lines.join("\n");
    let v: serde_json::Value = match serde_json::from_str(&json_text) {
        Ok(v) => v,
        Err(e) => {
            warn!(target:"providers::siliconflow","skipping malformed frame: {}", e);
            return None;
        }
    };
    if let Some(content) = v["choices"][0]["delta"]["content"].as_str() {
        if !content.is_empty() {
            return Some(ChatDelta::Text(content.to_string()));
        }
    }
    if let Some(fr) = v["choices"][0]["finish_reason"].as_str() {
        return Some(ChatDelta::Finish(Some(fr.to_string())));
    }
    None
}

/// Failures surfaced while the caller's token is signaled read as one
/// cancellation shape regardless of where the abort was detected.
fn normalize_canceled(err: ChatError, cancel: &CancelToken) -> ChatError {
    if cancel.is_canceled() {
        ChatError::Canceled
    } else {
        err
    }
}

fn map_reqwest_err(e: reqwest::Error) -> ChatError {
    error!(target:"providers::siliconflow","transport failure: {}", e);
    if e.is_timeout() {
        ChatError::Timeout(e.to_string())
    } else if e.is_connect() || e.is_request() {
        ChatError::Network(e.to_string())
    } else {
        ChatError::Malformed(e.to_string())
    }
}

fn map_status_err(status: StatusCode, body: Option<&str>) -> ChatError {
    let truncated: String = body.unwrap_or("").chars().take(500).collect();
    error!(target:"providers::siliconflow","chat request failed status={} body={}", status, truncated);
    let server_msg = body
        .and_then(|b| serde_json::from_str::<serde_json::Value>(b).ok())
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string));
    let message = server_msg.unwrap_or_else(|| match status.as_u16() {
        401 => "API密钥无效或已过期，请检查 SILICONFLOW_API_KEY 配置".to_string(),
        403 => "API访问被拒绝，请检查API密钥权限".to_string(),
        429 => "API调用频率过高，请稍后重试".to_string(),
        500..=599 => "SiliconFlow服务器暂时不可用，请稍后重试".to_string(),
        _ => {
            let raw: String = body.unwrap_or("").trim().chars().take(200).collect();
            if raw.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            } else {
                raw
            }
        }
    });
    ChatError::Http {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> ChatOpts {
        ChatOpts {
            model: "Pro/moonshotai/Kimi-K2-Instruct".to_string(),
            temperature: 0.8,
            max_tokens: 8192,
        }
    }

    #[test]
    fn request_body_carries_all_fields() {
        let msgs = vec![Message::system("s"), Message::user("q")];
        let body = build_request_body(&msgs, &opts(), true);
        assert_eq!(body["model"], "Pro/moonshotai/Kimi-K2-Instruct");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 8192);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "q");
    }

    #[test]
    fn request_body_is_deterministic() {
        let msgs = vec![Message::user("q")];
        assert_eq!(
            build_request_body(&msgs, &opts(), false),
            build_request_body(&msgs, &opts(), false)
        );
    }

    fn event(s: &str) -> bytes::Bytes {
        bytes::Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn parse_delta_frame() {
        let d = parse_sse_event(&event(r#"data: {"choices":[{"delta":{"content":"He"}}]}"#));
        match d {
            Some(ChatDelta::Text(t)) => assert_eq!(t, "He"),
            other => panic!("unexpected delta: {other:?}"),
        }
    }

    #[test]
    fn parse_done_sentinel() {
        assert!(matches!(
            parse_sse_event(&event("data: [DONE]")),
            Some(ChatDelta::Finish(None))
        ));
    }

    #[test]
    fn parse_finish_reason_frame() {
        let d = parse_sse_event(&event(
            r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
        ));
        assert!(matches!(d, Some(ChatDelta::Finish(Some(r))) if r == "stop"));
    }

    #[test]
    fn malformed_frame_is_skipped() {
        assert!(parse_sse_event(&event("data: {not json")).is_none());
    }

    #[test]
    fn empty_delta_content_is_skipped() {
        let d = parse_sse_event(&event(r#"data: {"choices":[{"delta":{"content":""}}]}"#));
        assert!(d.is_none());
    }

    #[test]
    fn comment_lines_are_ignored() {
        assert!(parse_sse_event(&event(": keep-alive")).is_none());
    }

    #[test]
    fn event_boundary_handles_both_line_endings() {
        let buf = bytes::BytesMut::from(&b"data: a\n\ndata: b"[..]);
        assert_eq!(find_event_boundary(&buf), Some(7));
        let buf = bytes::BytesMut::from(&b"data: a\r\n\r\ndata: b"[..]);
        assert_eq!(find_event_boundary(&buf), Some(7));
    }

    #[test]
    fn rate_limit_status_gets_specific_message() {
        let err = map_status_err(StatusCode::TOO_MANY_REQUESTS, Some("slow down"));
        match err {
            ChatError::Http { status, message } => {
                assert_eq!(status, 429);
                assert!(message.contains("频率"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn server_message_takes_precedence_over_heuristic() {
        let err = map_status_err(
            StatusCode::UNAUTHORIZED,
            Some(r#"{"error":{"message":"invalid api key"}}"#),
        );
        match err {
            ChatError::Http { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "invalid api key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unclassified_status_falls_back_to_body_prefix() {
        let err = map_status_err(StatusCode::IM_A_TEAPOT, Some("short and stout"));
        assert!(matches!(
            err,
            ChatError::Http { status: 418, message } if message == "short and stout"
        ));
    }

    #[test]
    fn unclassified_status_without_body_uses_reason() {
        let err = map_status_err(StatusCode::IM_A_TEAPOT, None);
        assert!(matches!(
            err,
            ChatError::Http { status: 418, message } if message == "I'm a teapot"
        ));
    }

    #[test]
    fn canceled_token_rewrites_transport_errors() {
        let token = CancelToken::new();
        token.cancel();
        let err = normalize_canceled(ChatError::Network("down".into()), &token);
        assert!(matches!(err, ChatError::Canceled));
    }

    #[test]
    fn unsignaled_token_keeps_original_error() {
        let token = CancelToken::new();
        let err = normalize_canceled(ChatError::Network("down".into()), &token);
        assert!(matches!(err, ChatError::Network(_)));
    }

    #[test]
    fn messages_serialize_in_turn_order() {
        let msgs = vec![
            Message::system("s"),
            Message::user("q1"),
            Message::assistant("a1"),
            Message::user("q2"),
        ];
        let body = build_request_body(&msgs, &opts(), false);
        let roles: Vec<&str> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
    }
}
