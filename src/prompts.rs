//! System prompts for batch translation.
//!
//! A system prompt is assembled from three parts:
//!
//! 1. **Guidelines**: a built-in [`PromptPreset`] or custom guidelines text
//!    (`TRANSLATION_GUIDELINES`). A full override (`SYSTEM_PROMPT`) replaces
//!    the guidelines outright.
//! 2. **Placeholders**: `{source}`, `{target}` and `{book}` are substituted
//!    in whichever text was chosen.
//! 3. **Prompt context**: per-call instructions appended verbatim; the
//!    translate stage passes [`SEGMENT_INSTRUCTIONS`].
//!
//! Callers override the defaults through
//! [`crate::config::TranslateConfig::prompt`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default guidelines, suitable for most prose.
pub const GENERAL_GUIDELINES: &str = r#"You are a professional translator working on the book "{book}". Translate the user's content from {source} to {target}.

Rules:
- Translate meaning, not words. The result must read as if originally written in {target}.
- Keep every HTML tag, attribute and entity exactly as given. Translate only the text between tags.
- Do not add, drop, merge or reorder sentences.
- Keep proper names, code and URLs unchanged unless {target} has an established form.
- Output only the translation. No notes, no explanations, no markdown fences."#;

/// Guidelines for technical books: terminology stays stable and precise.
pub const TECHNICAL_GUIDELINES: &str = r#"You are a senior technical translator working on the book "{book}". Translate the user's content from {source} to {target}.

Rules:
- Use the standard {target} terminology of the field. When no established term exists, keep the {source} term and add the {target} explanation in parentheses the first time it appears.
- Keep identifiers, commands, file names, numbers and units exactly as written.
- Keep every HTML tag, attribute and entity exactly as given. Translate only the text between tags.
- Prefer short, direct sentences. Do not summarise or expand.
- Output only the translation. No notes, no explanations, no markdown fences."#;

/// Guidelines for fiction and narrative non-fiction: voice and rhythm first.
pub const LITERARY_GUIDELINES: &str = r#"You are a literary translator working on the book "{book}". Translate the user's content from {source} to {target}.

Rules:
- Preserve the author's voice, tone, rhythm and imagery. Idioms become natural {target} idioms rather than literal renderings.
- Dialogue must sound like real speech in {target}; keep each speaker's register.
- Keep character and place names consistent throughout.
- Keep every HTML tag, attribute and entity exactly as given. Translate only the text between tags.
- Output only the translation. No notes, no explanations, no markdown fences."#;

/// Appended to the system prompt for segment-marked batches.
pub const SEGMENT_INSTRUCTIONS: &str = r#"The content is a sequence of segments, each wrapped as <SEGMENT_i>…</SEGMENT_i> where i is its index.
- Translate each segment independently and return every segment, in the same order, wrapped in the same markers.
- Never merge, split, skip or renumber segments.
- If a segment needs no translation, return it unchanged inside its markers."#;

/// Built-in guideline sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptPreset {
    #[default]
    General,
    Technical,
    Literary,
}

impl PromptPreset {
    pub fn guidelines(self) -> &'static str {
        match self {
            PromptPreset::General => GENERAL_GUIDELINES,
            PromptPreset::Technical => TECHNICAL_GUIDELINES,
            PromptPreset::Literary => LITERARY_GUIDELINES,
        }
    }
}

impl fmt::Display for PromptPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PromptPreset::General => "general",
            PromptPreset::Technical => "technical",
            PromptPreset::Literary => "literary",
        })
    }
}

impl FromStr for PromptPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "general" => Ok(PromptPreset::General),
            "technical" => Ok(PromptPreset::Technical),
            "literary" => Ok(PromptPreset::Literary),
            other => Err(format!(
                "preset must be one of general, technical, literary (got '{other}')"
            )),
        }
    }
}

/// Prompt configuration shared by every call of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSettings {
    pub preset: PromptPreset,
    /// Replaces the preset's guidelines.
    pub guidelines: Option<String>,
    /// Replaces the whole system prompt, prompt context excepted.
    pub system_override: Option<String>,
}

/// Substitute `{source}`, `{target}` and `{book}`.
pub fn render_template(template: &str, source: &str, target: &str, book: &str) -> String {
    template
        .replace("{source}", source)
        .replace("{target}", target)
        .replace("{book}", book)
}

/// The system prompt for one call.
pub fn system_prompt(
    settings: &PromptSettings,
    source: &str,
    target: &str,
    book: &str,
    prompt_context: &str,
) -> String {
    let non_blank = |t: &&str| !t.trim().is_empty();
    let template = settings
        .system_override
        .as_deref()
        .filter(non_blank)
        .or(settings.guidelines.as_deref().filter(non_blank))
        .unwrap_or_else(|| settings.preset.guidelines());

    let mut prompt = render_template(template, source, target, book);
    if !prompt_context.trim().is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(prompt_context.trim());
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_carry_every_placeholder() {
        for preset in [PromptPreset::General, PromptPreset::Technical, PromptPreset::Literary] {
            let g = preset.guidelines();
            assert!(g.contains("{source}") && g.contains("{target}") && g.contains("{book}"));
        }
    }

    #[test]
    fn default_prompt_is_rendered_with_context() {
        let p = system_prompt(
            &PromptSettings::default(),
            "English",
            "French",
            "Dune",
            SEGMENT_INSTRUCTIONS,
        );
        assert!(p.contains("from English to French"));
        assert!(p.contains("\"Dune\""));
        assert!(p.ends_with(SEGMENT_INSTRUCTIONS.trim()));
        assert!(!p.contains("{target}"));
    }

    #[test]
    fn override_beats_guidelines_beats_preset() {
        let mut settings = PromptSettings {
            preset: PromptPreset::Literary,
            guidelines: Some("Guidelines to {target}".into()),
            system_override: None,
        };
        assert_eq!(
            system_prompt(&settings, "en", "fr", "b", ""),
            "Guidelines to fr"
        );
        settings.system_override = Some("Only {book}".into());
        assert_eq!(system_prompt(&settings, "en", "fr", "b", ""), "Only b");
    }

    #[test]
    fn blank_guidelines_fall_back_to_preset() {
        let settings = PromptSettings {
            preset: PromptPreset::Technical,
            guidelines: Some("   ".into()),
            system_override: None,
        };
        assert!(system_prompt(&settings, "en", "fr", "b", "").contains("technical translator"));
    }

    #[test]
    fn preset_parses() {
        assert_eq!("Literary".parse::<PromptPreset>().unwrap(), PromptPreset::Literary);
        assert!("psychology".parse::<PromptPreset>().is_err());
    }
}
