use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use atlas_core::transport::DEFAULT_SYSTEM_INSTRUCTION;

/// Key of the prompt that replaces the built-in persona.
pub const SYSTEM_PROMPT_KEY: &str = "system_prompt";

/// Loads every `*.md` file in `prompts_path`, keyed by file stem.
///
/// A missing directory yields no prompts.
pub fn load_prompts(prompts_path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();
    if !prompts_path.is_dir() {
        return Ok(prompts);
    }
    for entry in fs::read_dir(prompts_path)
        .with_context(|| format!("Failed to read prompts from {}", prompts_path.display()))?
    {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?
                .to_string();
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            prompts.insert(prompt_key, content);
        }
    }
    Ok(prompts)
}

/// The system instruction: `system_prompt.md` when present and non-blank,
/// otherwise the built-in Atlas persona.
pub fn system_instruction(prompts: &HashMap<String, String>) -> String {
    prompts
        .get(SYSTEM_PROMPT_KEY)
        .map(|prompt| prompt.trim())
        .filter(|prompt| !prompt.is_empty())
        .unwrap_or(DEFAULT_SYSTEM_INSTRUCTION)
        .to_string()
}
