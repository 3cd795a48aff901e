pub mod fallback;

use docent_core::chat::{CancelToken, ChatError, ChatOpts, Message, ModelClient, ProgressFn};
use providers::siliconflow::catalog::{self, TaskTag};
use tracing::debug;

/// Per-call knobs shared by both entry points. A supplied progress sink is
/// what selects the streaming wire path; without one the call is a single
/// round trip.
#[derive(Default)]
pub struct CallOptions<'a> {
    pub cancel: CancelToken,
    pub on_progress: Option<ProgressFn<'a>>,
    pub model: Option<String>,
}

/// Docent-facing chat use-cases over an injected `ModelClient`. Holds only
/// immutable configuration; independent calls share nothing.
pub struct AstronomyGuide<C> {
    client: C,
    default_model: Option<String>,
}

impl<C: ModelClient> AstronomyGuide<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            default_model: None,
        }
    }

    /// Prefer `model` when the catalog knows it; unknown ids silently fall
    /// back rather than failing every subsequent call.
    pub fn with_default_model(client: C, model: impl Into<String>) -> Self {
        Self {
            client,
            default_model: Some(model.into()),
        }
    }

    /// Open-ended Q&A: docent system prompt (optionally extended with the
    /// paragraph currently being studied), prior turns, then the question.
    pub async fn ask(
        &self,
        question: &str,
        context: Option<&str>,
        history: &[Message],
        opts: CallOptions<'_>,
    ) -> Result<String, ChatError> {
        let mut msgs = Vec::with_capacity(history.len() + 2);
        msgs.push(Message::system(astronomy_guide_prompt(context)));
        msgs.extend_from_slice(history);
        msgs.push(Message::user(question));
        self.submit(msgs, TaskTag::Dialogue, opts).await
    }

    /// Paraphrase scoring: rubric system prompt plus one structured user turn
    /// embedding both texts. The reply is requested as a scoring JSON shape;
    /// validating that shape is the caller's concern.
    pub async fn evaluate_paraphrase(
        &self,
        original: &str,
        paraphrase: &str,
        opts: CallOptions<'_>,
    ) -> Result<String, ChatError> {
        let msgs = vec![
            Message::system(EVALUATOR_SYSTEM_PROMPT),
            Message::user(evaluation_prompt(original, paraphrase)),
        ];
        self.submit(msgs, TaskTag::Evaluation, opts).await
    }

    async fn submit(
        &self,
        msgs: Vec<Message>,
        task: TaskTag,
        opts: CallOptions<'_>,
    ) -> Result<String, ChatError> {
        let model_id = match opts.model.as_deref() {
            Some(id) => id,
            None => catalog::model_for_task(task, self.default_model.as_deref()),
        };
        let profile = catalog::profile_of(model_id)?;
        let chat_opts = ChatOpts {
            model: profile.id.to_string(),
            temperature: profile.temperature,
            max_tokens: profile.max_tokens,
        };
        debug!(target:"guide","submit task={:?} model={} turns={}", task, profile.id, msgs.len());
        match opts.on_progress {
            Some(sink) => {
                self.client
                    .stream_chat(&msgs, &chat_opts, &opts.cancel, sink)
                    .await
            }
            None => self.client.send_chat(&msgs, &chat_opts, &opts.cancel).await,
        }
    }
}

const GUIDE_BASE_PROMPT: &str = "你是上海天文馆的专业AI讲解员，具有以下特点：

1. **专业背景**：
   - 拥有深厚的天文学知识背景
   - 熟悉上海天文馆的所有展区和展品
   - 了解最新的天文学发现和研究成果

2. **讲解风格**：
   - 友好、耐心、富有启发性
   - 能够将复杂的天文概念用通俗易懂的语言解释
   - 善于引导观众思考和探索
   - 注重互动和参与感

3. **回答原则**：
   - 基于科学事实，准确可靠
   - 结合上海天文馆的展区内容
   - 适合不同年龄层的观众
   - 鼓励进一步学习和探索

4. **服务对象**：
   - 主要为讲解员提供专业支持
   - 帮助解答天文相关问题
   - 提供深入的知识讲解
   - 协助准备讲解内容";

fn astronomy_guide_prompt(context: Option<&str>) -> String {
    match context {
        Some(content) => format!(
            "{GUIDE_BASE_PROMPT}\n\n5. **当前讲解内容**：\n{content}\n\n请基于以上内容和你的专业知识，为讲解员提供准确、生动的解答和补充说明。"
        ),
        None => GUIDE_BASE_PROMPT.to_string(),
    }
}

const EVALUATOR_SYSTEM_PROMPT: &str =
    "你是一个专业的天文馆讲解员培训专家，能够客观、详细地评估讲解员的复述表现。";

fn evaluation_prompt(original: &str, paraphrase: &str) -> String {
    format!(
        "请作为专业的天文馆讲解员评估员，对以下复述内容进行专业评估。\n\n原文内容：\n{original}\n\n复述内容：\n{paraphrase}\n\n请提供详细的评估报告，包括：\n1. 综合评分 (0-100分)\n2. 主要优点\n3. 改进建议\n4. 总体评价\n\n请以JSON格式返回，结构如下：\n{{\n  \"score\": 85,\n  \"strengths\": [\"优点1\", \"优点2\"],\n  \"improvements\": [\"建议1\", \"建议2\"],\n  \"overall_feedback\": \"总体评价\"\n}}"
    )
}
