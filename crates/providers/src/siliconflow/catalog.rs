use docent_core::chat::ChatError;

/// Per-model generation parameters. The catalog is fixed at compile time;
/// every model id that reaches the wire must come from here.
#[derive(Clone, Copy, Debug)]
pub struct ModelProfile {
    pub id: &'static str,
    pub label: &'static str,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Guaranteed catalog member used when nothing better is configured.
pub const FALLBACK_MODEL: &str = "Pro/moonshotai/Kimi-K2-Instruct";

const MODELS: &[ModelProfile] = &[
    ModelProfile {
        id: "Pro/deepseek-ai/DeepSeek-V3.1",
        label: "DeepSeek-V3.1",
        max_tokens: 8192,
        temperature: 0.7,
    },
    ModelProfile {
        id: "Pro/deepseek-ai/DeepSeek-R1",
        label: "DeepSeek-R1",
        max_tokens: 8192,
        temperature: 0.6,
    },
    ModelProfile {
        id: "Pro/moonshotai/Kimi-K2-Instruct",
        label: "Kimi-K2",
        max_tokens: 8192,
        temperature: 0.8,
    },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskTag {
    Dialogue,
    Reasoning,
    Evaluation,
}

fn candidates(tag: TaskTag) -> &'static [&'static str] {
    match tag {
        TaskTag::Dialogue => &[
            "Pro/moonshotai/Kimi-K2-Instruct",
            "Pro/deepseek-ai/DeepSeek-V3.1",
        ],
        TaskTag::Reasoning => &[
            "Pro/deepseek-ai/DeepSeek-R1",
            "Pro/deepseek-ai/DeepSeek-V3.1",
        ],
        TaskTag::Evaluation => &[
            "Pro/deepseek-ai/DeepSeek-V3.1",
            "Pro/moonshotai/Kimi-K2-Instruct",
        ],
    }
}

pub fn profile_of(id: &str) -> Result<&'static ModelProfile, ChatError> {
    MODELS
        .iter()
        .find(|p| p.id == id)
        .ok_or_else(|| ChatError::Unconfigured(format!("unknown model: {id}")))
}

/// Configured default if it is a catalog member, else the fixed fallback.
/// Never returns an unregistered id.
pub fn default_model(configured: Option<&str>) -> &'static str {
    configured
        .and_then(|id| MODELS.iter().find(|p| p.id == id))
        .map(|p| p.id)
        .unwrap_or(FALLBACK_MODEL)
}

/// First task candidate present in the catalog, else the default model.
pub fn model_for_task(tag: TaskTag, configured: Option<&str>) -> &'static str {
    candidates(tag)
        .iter()
        .find(|id| MODELS.iter().any(|p| p.id == **id))
        .copied()
        .unwrap_or_else(|| default_model(configured))
}
