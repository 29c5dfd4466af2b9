//! Prompt templates for Jotta.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Prompts {
    pub summarize: SummarizePrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: std::collections::HashMap<String, String>,
}

/// Prompts for chunk summarization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizePrompts {
    /// System message (chat providers only).
    pub system: String,
    /// Per-chunk prompt. `{{text}}` is replaced with the chunk.
    pub user: String,
}

impl Default for SummarizePrompts {
    fn default() -> Self {
        Self {
            system: r#"You turn lecture and video transcripts into study material.

Rules:
- Write one key point per line
- Each line must stand on its own as a flashcard
- No numbering, bullets or headings
- Never add facts that are not in the text"#
                .to_string(),

            user: "Summarize the following text into concise and important points suitable for flashcards:\n\n{{text}}\n\nSummary:".to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&std::collections::HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let summarize_path = custom_path.join("summarize.toml");
            if summarize_path.exists() {
                let content = std::fs::read_to_string(&summarize_path)?;
                prompts.summarize = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &std::collections::HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(
        &self,
        template: &str,
        vars: &std::collections::HashMap<String, String>,
    ) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }

    /// Render the per-chunk summarization prompt.
    pub fn summarize_prompt(&self, text: &str) -> String {
        let mut vars = std::collections::HashMap::new();
        vars.insert("text".to_string(), text.to_string());
        self.render_with_custom(&self.summarize.user, &vars)
    }
}
