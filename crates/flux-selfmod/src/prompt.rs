//! Model instructions for change generation.

use flux_core::ChatMessage;

/// System turn for every generation.
pub const SYSTEM_PROMPT: &str = r#"You modify the code of the project you are running in. Reply with a single JSON object and nothing else: no prose, no markdown.

Shape:
{
  "description": "one-line summary of the change",
  "changes": [
    {
      "path": "path/relative/to/project/root",
      "action": "create" | "modify" | "delete",
      "new_content": "complete file content (omit for delete)"
    }
  ]
}

Rules:
- Paths are relative to the project root and never leave it.
- "modify" replaces the whole file, so send the full new content.
- Never touch Dockerfile, fly.toml, anything under .github/, or .env files.
- Keep the change as small as the request allows."#;

/// User turn: tree summary followed by the request.
pub fn user_turn(tree: &str, request: &str) -> String {
    format!("Project structure:\n{tree}\n\nRequest: {request}")
}

/// The two-message conversation sent to the provider.
pub fn build_messages(tree: &str, request: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(user_turn(tree, request)),
    ]
}
