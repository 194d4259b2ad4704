//! Fixed prompt templates and response cleanup.

use std::sync::OnceLock;

use regex::Regex;

use super::GenerationOptions;

pub const REWRITE_OPTIONS: GenerationOptions = GenerationOptions {
    temperature: 0.7,
    max_output_tokens: 100,
};

pub const SUGGEST_OPTIONS: GenerationOptions = GenerationOptions {
    temperature: 0.8,
    max_output_tokens: 100,
};

/// Placeholder shown in the suggestion panel when generation fails.
pub const SUGGESTION_FAILED: &str = "Failed to get suggestion";

pub fn rewrite_prompt(content: &str) -> String {
    format!(
        "You are a helpful assistant that rewrites todo tasks to be more clear and actionable. \
         Keep the rewritten task concise but specific. Rewrite this todo task: \"{}\"",
        content
    )
}

pub fn suggest_prompt<S: AsRef<str>>(existing: &[S]) -> String {
    let joined = existing
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Based on these existing todos: \"{}\", suggest a new related task that would be \
         helpful to add. Keep it concise and specific.",
        joined
    )
}

fn surrounding_quote() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^["']|["']$"#).expect("static regex"))
}

/// Clean a rewrite response: trim, drop one leading and one trailing quote,
/// then drop a `Rewritten task: ` prefix.
pub fn clean_rewrite(raw: &str) -> String {
    let unquoted = surrounding_quote().replace_all(raw.trim(), "");
    unquoted
        .strip_prefix("Rewritten task: ")
        .unwrap_or(&unquoted)
        .to_string()
}

pub fn clean_suggestion(raw: &str) -> String {
    raw.trim().to_string()
}
