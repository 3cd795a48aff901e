pub mod chat {
    use futures::Stream;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use thiserror::Error;

    #[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "lowercase")]
    pub enum Role {
        System,
        User,
        Assistant,
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct Message {
        pub role: Role,
        pub content: String,
    }

    impl Message {
        pub fn system(content: impl Into<String>) -> Self {
            Self { role: Role::System, content: content.into() }
        }
        pub fn user(content: impl Into<String>) -> Self {
            Self { role: Role::User, content: content.into() }
        }
        pub fn assistant(content: impl Into<String>) -> Self {
            Self { role: Role::Assistant, content: content.into() }
        }
    }

    #[derive(Clone, Debug)]
    pub struct ChatOpts {
        pub model: String,
        pub temperature: f32,
        pub max_tokens: u32,
    }

    #[derive(Clone, Debug)]
    pub enum ChatDelta {
        Text(String),
        Finish(Option<String>),
    }

    /// Closed error taxonomy for the chat transport. Classification happens at
    /// the point of failure detection; variants are propagated unchanged.
    #[derive(Error, Debug)]
    pub enum ChatError {
        #[error("not configured: {0}")] Unconfigured(String),
        #[error("network unreachable: {0}")] Network(String),
        #[error("timeout: {0}")] Timeout(String),
        #[error("canceled")] Canceled,
        #[error("http {status}: {message}")] Http { status: u16, message: String },
        #[error("malformed response: {0}")] Malformed(String),
    }

    impl ChatError {
        pub fn is_network(&self) -> bool {
            matches!(self, ChatError::Network(_))
        }
        pub fn is_canceled(&self) -> bool {
            matches!(self, ChatError::Canceled)
        }
    }

    /// One-shot cooperative cancellation signal. Callers own and signal it;
    /// the transport only reads it. Once signaled it stays signaled.
    #[derive(Clone, Debug, Default)]
    pub struct CancelToken(Arc<AtomicBool>);

    impl CancelToken {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn cancel(&self) {
            self.0.store(true, Ordering::Relaxed);
        }

        pub fn is_canceled(&self) -> bool {
            self.0.load(Ordering::Relaxed)
        }
    }

    pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatDelta, ChatError>> + Send>>;

    use std::pin::Pin;

    /// Progress sink for streaming calls: invoked with the full accumulated
    /// text after each decoded delta, never with bare fragments.
    pub type ProgressFn<'a> = &'a mut (dyn FnMut(&str) + Send);

    #[allow(async_fn_in_trait)]
    pub trait ModelClient: Send + Sync {
        async fn send_chat(
            &self,
            msgs: &[Message],
            opts: &ChatOpts,
            cancel: &CancelToken,
        ) -> Result<String, ChatError>;
        async fn stream_chat(
            &self,
            msgs: &[Message],
            opts: &ChatOpts,
            cancel: &CancelToken,
            on_progress: ProgressFn<'_>,
        ) -> Result<String, ChatError>;
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn cancel_token_is_one_shot() {
            let token = CancelToken::new();
            assert!(!token.is_canceled());
            token.cancel();
            assert!(token.is_canceled());
            token.cancel();
            assert!(token.is_canceled());
        }

        #[test]
        fn cancel_token_clones_share_state() {
            let token = CancelToken::new();
            let seen_by_transport = token.clone();
            token.cancel();
            assert!(seen_by_transport.is_canceled());
        }

        #[test]
        fn role_serializes_lowercase() {
            let msg = Message::system("hi");
            let v = serde_json::to_value(&msg).unwrap();
            assert_eq!(v["role"], "system");
            assert_eq!(v["content"], "hi");
        }
    }
}
