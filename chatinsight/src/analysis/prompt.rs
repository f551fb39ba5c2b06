//! Instruction templates sent with every transcript.

use crate::llm::ChatMessage;

pub const SYSTEM_ROLE: &str = "You are a senior sales analyst responsible for evaluating the behavior of the chatbot of a motel chain.";

const TRANSCRIPT_PLACEHOLDER: &str = "{session_chat_history}";

pub const USER_TEMPLATE: &str = r#"
When you receive the interaction history with the chatbot for a single session, you must:
1. Analyze the level of satisfaction and give it a score from 0 to 10.
2. Summarize the main points of that session as bullet points.
3. Point out improvements for the chatbot's behavior.

The output must be a JSON object.

Example:
{
    "satisfaction": 7,
    "summary": [
        "- The user tried to book a suite.",
        "- The chatbot gave detailed information about prices.",
        "- The chatbot did not understand the request to change the check-in time."
    ],
    "improvement": [
        "- Improve understanding of check-in time changes.",
        "- More objective and direct answers."
    ]
}

Session history:
{session_chat_history}
"#;

/// System and user messages for one session transcript.
pub fn build_messages(transcript: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_ROLE),
        ChatMessage::user(USER_TEMPLATE.replace(TRANSCRIPT_PLACEHOLDER, transcript)),
    ]
}
