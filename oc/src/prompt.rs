//! Prompt composition
//!
//! A question may travel with the code the user is looking at. When it does,
//! the code is placed in a fenced block ahead of the question.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Label used when the code's language is unknown
pub const UNSPECIFIED_LANGUAGE: &str = "unspecified language";

/// Code accompanying a question
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeContext {
    pub content: String,
    pub language: Option<String>,
}

impl CodeContext {
    pub fn new(content: impl Into<String>, language: Option<String>) -> Self {
        Self {
            content: content.into(),
            language,
        }
    }

    /// Load code from a file, inferring the language from its extension
    /// when none is given
    pub fn from_file(path: impl AsRef<Path>, language: Option<String>) -> std::io::Result<Self> {
        let path = path.as_ref();
        debug!(?path, ?language, "CodeContext::from_file: called");
        let content = std::fs::read_to_string(path)?;
        let language = language.or_else(|| infer_language(path).map(str::to_string));
        Ok(Self { content, language })
    }

    fn language(&self) -> Option<&str> {
        self.language.as_deref().map(str::trim).filter(|l| !l.is_empty())
    }
}

/// Guess a fence tag from a file extension
pub fn infer_language(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let language = match ext.as_str() {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" => "typescript",
        "java" => "java",
        "kt" => "kotlin",
        "go" => "go",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "sh" | "bash" => "bash",
        "sql" => "sql",
        "html" => "html",
        "css" => "css",
        "json" => "json",
        "yml" | "yaml" => "yaml",
        "toml" => "toml",
        _ => return None,
    };
    Some(language)
}

/// Build the text dispatched to the backend
///
/// Without context (or with blank context content) the prompt is returned
/// unchanged.
pub fn compose_prompt(prompt: &str, context: Option<&CodeContext>) -> String {
    let Some(ctx) = context.filter(|c| !c.content.trim().is_empty()) else {
        debug!(prompt_len = prompt.len(), "compose_prompt: no context");
        return prompt.to_string();
    };

    debug!(
        prompt_len = prompt.len(),
        content_len = ctx.content.len(),
        language = ?ctx.language(),
        "compose_prompt: embedding context"
    );

    let label = ctx.language().unwrap_or(UNSPECIFIED_LANGUAGE);
    let fence_tag = ctx.language().unwrap_or("");
    format!(
        "User's code ({}):\n```{}\n{}\n```\n\nUser's question: {}",
        label, fence_tag, ctx.content, prompt
    )
}
