//! Keyword heuristic for spotting code-change requests in chat.

/// Lower-case phrases that route a chat message to the change engine.
const CHANGE_KEYWORDS: &[&str] = &[
    "変更して",
    "修正して",
    "追加して",
    "削除して",
    "変えて",
    "コードを",
    "ファイルを",
    "実装して",
    "リファクタ",
    "change the",
    "modify the",
    "add a",
    "remove the",
    "update the",
    "refactor",
    "implement",
    "fix the code",
    "edit the",
    "/change",
    "/modify",
    "/selfmod",
];

/// Whether `message` reads like a request to change the code base.
pub fn looks_like_change_request(message: &str) -> bool {
    let lower = message.to_lowercase();
    CHANGE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}
