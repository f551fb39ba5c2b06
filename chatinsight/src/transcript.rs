//! Rendering of a session's messages into the transcript the model reads.
//!
//! Every message becomes one `"<role>:<content>"` line where the role is `user` for messages
//! sent by the human on the other end (`remote = true`) and `bot` otherwise. Lines are ordered by
//! creation time; messages sharing a timestamp keep the order they were given in.

use crate::db::models::sessions::Message;

const USER_ROLE: &str = "user";
const BOT_ROLE: &str = "bot";

/// Role tag for a single message.
pub fn role_of(message: &Message) -> &'static str {
    if message.remote { USER_ROLE } else { BOT_ROLE }
}

/// Format messages as role-tagged lines in ascending creation order.
pub fn format_messages(messages: &[Message]) -> Vec<String> {
    let mut ordered: Vec<&Message> = messages.iter().collect();
    // sort_by_key is stable, so equal timestamps keep their input order
    ordered.sort_by_key(|message| message.created_at);

    ordered
        .into_iter()
        .map(|message| format!("{}:{}", role_of(message), message.content))
        .collect()
}

/// Format messages and join them into a single newline-separated transcript.
pub fn render_transcript(messages: &[Message]) -> String {
    format_messages(messages).join("\n")
}
