//! Canned replies for when the remote service is unreachable. The transport
//! never calls this; callers substitute it after classifying a failure as
//! `ChatError::Network`, keeping "the call failed" separate from "we chose to
//! degrade".

const GREETING_REPLY: &str = "您好！我是上海天文馆的AI讲解员。虽然当前网络连接有些问题，但我很乐意为您介绍天文知识。请稍后重试，或者您可以浏览展区内容了解更多信息。";

const QUESTION_REPLY: &str =
    "抱歉，由于网络连接问题，我暂时无法为您提供详细回答。建议您稍后重试，或者查看展区的详细介绍内容。";

const GENERAL_REPLY: &str = "很抱歉，当前AI服务暂时不可用。您可以：\n\n1. 检查网络连接后重试\n2. 浏览展区的详细内容\n3. 稍后再次尝试提问\n\n感谢您的理解！";

/// Pick a canned reply by a lightweight classification of the outgoing query:
/// greeting tokens, then question markers, else a generic notice.
pub fn fallback_response(query: &str) -> &'static str {
    let q = query.to_lowercase();

    if q.contains("你好") || q.contains("hello") || q.contains("hi") {
        GREETING_REPLY
    } else if q.contains('?')
        || q.contains('？')
        || q.contains("什么")
        || q.contains("如何")
        || q.contains("为什么")
    {
        QUESTION_REPLY
    } else {
        GENERAL_REPLY
    }
}
