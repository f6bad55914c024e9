//! Prompt assembly for the generator, critic and link proposal calls.

use serde_json::Value;

use crate::confidence::FieldConfidence;
use crate::record::{GameRecord, LinkField, Payload};

/// Fixed context when no local record matches.
pub const NO_MATCHES_CONTEXT: &str = "No local database matches found.";

fn json_text<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}

/// Assembles completion prompts.
pub struct PromptAssembler;

impl PromptAssembler {
    /// Context from an existing record: its JSON form.
    pub fn existing_context(record: &GameRecord) -> String {
        json_text(record)
    }

    /// Context from search matches: `[i] title (title_ja): summary` lines.
    pub fn matches_context(matches: &[GameRecord], limit: usize) -> String {
        if matches.is_empty() || limit == 0 {
            return NO_MATCHES_CONTEXT.to_string();
        }
        matches
            .iter()
            .take(limit)
            .enumerate()
            .map(|(i, m)| format!("[{}] {}", i + 1, m.context_line()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// First pass: draft a record with per-field confidence.
    pub fn build_generator_prompt(query: &str, context: &str) -> String {
        let mut prompt = String::new();

        prompt.push_str("# BOARD GAME METADATA REQUEST\n\n");
        prompt.push_str("You write accurate reference entries for board games.\n");
        prompt.push_str("Answer in Japanese for prose fields unless the field is English-only.\n\n");
        prompt.push_str(&format!("**Query**: {}\n\n", query));

        prompt.push_str("## Local Context\n\n");
        prompt.push_str(context);
        prompt.push_str("\n\n");

        prompt.push_str("## Rules\n\n");
        prompt.push_str("1. Use null for anything you are not sure of. Never invent URLs.\n");
        prompt.push_str("2. Integer fields must be JSON integers.\n");
        prompt.push_str("3. rules_content is Markdown covering setup, turn flow and end of game.\n");
        prompt.push_str("4. Rate your confidence in every field from 0.0 to 1.0.\n\n");

        prompt.push_str("## Required Response Format\n\n");
        prompt.push_str("```json\n");
        prompt.push_str("{\n");
        prompt.push_str("  \"data\": {\n");
        prompt.push_str("    \"slug\": \"<ascii-kebab-case>\",\n");
        prompt.push_str("    \"title\": \"<display title>\",\n");
        prompt.push_str("    \"title_ja\": \"<Japanese title or null>\",\n");
        prompt.push_str("    \"title_en\": \"<English title or null>\",\n");
        prompt.push_str("    \"summary\": \"<one paragraph>\",\n");
        prompt.push_str("    \"description\": \"<longer description>\",\n");
        prompt.push_str("    \"rules_content\": \"<markdown>\",\n");
        prompt.push_str("    \"min_players\": 0, \"max_players\": 0, \"play_time\": 0,\n");
        prompt.push_str("    \"min_age\": 0, \"published_year\": 0,\n");
        prompt.push_str("    \"official_url\": null, \"bgg_url\": null, \"bga_url\": null,\n");
        prompt.push_str("    \"amazon_url\": null, \"image_url\": null,\n");
        prompt.push_str("    \"structured_data\": {\n");
        prompt.push_str("      \"keywords\": [{\"term\": \"\", \"description\": \"\"}],\n");
        prompt.push_str("      \"key_elements\": [{\"name\": \"\", \"type\": \"\", \"reason\": \"\"}],\n");
        prompt.push_str("      \"mechanics\": [\"\"],\n");
        prompt.push_str("      \"best_player_count\": null\n");
        prompt.push_str("    }\n");
        prompt.push_str("  },\n");
        prompt.push_str("  \"data_confidence\": {\"<field>\": 0.0-1.0},\n");
        prompt.push_str("  \"issues\": [\"<doubts about the draft>\"]\n");
        prompt.push_str("}\n");
        prompt.push_str("```\n");

        prompt
    }

    /// Review pass over a draft. `fix_requests` is empty on the first
    /// critique and carries validation issues on the repair pass.
    pub fn build_critic_prompt(
        query: &str,
        draft: &Payload,
        confidence: &FieldConfidence,
        issues: &[Value],
        context: &str,
        fix_requests: &[String],
        protected_fields: &[String],
    ) -> String {
        let mut prompt = String::new();

        prompt.push_str("# BOARD GAME METADATA REVIEW\n\n");
        prompt.push_str("Review the draft entry below and return a corrected version.\n\n");
        prompt.push_str(&format!("**Query**: {}\n\n", query));

        prompt.push_str("## Draft\n\n```json\n");
        prompt.push_str(&json_text(draft));
        prompt.push_str("\n```\n\n");

        prompt.push_str("## Field Confidence\n\n```json\n");
        prompt.push_str(&json_text(confidence));
        prompt.push_str("\n```\n\n");

        prompt.push_str("## Known Issues\n\n");
        prompt.push_str(&json_text(issues));
        prompt.push_str("\n\n");

        prompt.push_str("## Local Context\n\n");
        prompt.push_str(context);
        prompt.push_str("\n\n");

        prompt.push_str("## Protected Fields\n\n");
        prompt.push_str("Keep these unless they are clearly wrong:\n");
        prompt.push_str(&json_text(protected_fields));
        prompt.push_str("\n\n");

        if !fix_requests.is_empty() {
            prompt.push_str("## Fix Requests\n\n");
            prompt.push_str("The previous answer failed these checks. Fix every one:\n\n");
            for request in fix_requests {
                prompt.push_str(&format!("- {}\n", request));
            }
            prompt.push('\n');
        }

        prompt.push_str("## Required Response Format\n\n");
        prompt.push_str("```json\n");
        prompt.push_str("{\n");
        prompt.push_str("  \"data\": { <full corrected entry, same keys as the draft> },\n");
        prompt.push_str("  \"notes\": [\"<what you checked>\"],\n");
        prompt.push_str("  \"unresolved_issues\": [\"<problems you could not fix>\"],\n");
        prompt.push_str("  \"changed_fields\": [\"<keys you changed>\"]\n");
        prompt.push_str("}\n");
        prompt.push_str("```\n");

        prompt
    }

    /// Ask for candidate URLs for the tracked link fields.
    pub fn build_link_prompt(record: &GameRecord) -> String {
        let mut prompt = String::new();

        prompt.push_str("# BOARD GAME LINK LOOKUP\n\n");
        prompt.push_str(&format!("**Game**: {}\n", record.title));
        if let Some(ja) = &record.title_ja {
            prompt.push_str(&format!("**Japanese title**: {}\n", ja));
        }
        if let Some(en) = &record.title_en {
            prompt.push_str(&format!("**English title**: {}\n", en));
        }
        prompt.push('\n');

        prompt.push_str("## Current Links\n\n");
        for field in LinkField::ALL {
            prompt.push_str(&format!(
                "- {}: {}\n",
                field,
                record.link(field).unwrap_or("null")
            ));
        }

        prompt.push_str("\n## Rules\n\n");
        prompt.push_str("1. official_url: the publisher or designer page for this game.\n");
        prompt.push_str("2. amazon_url: a product page on amazon.co.jp or amazon.com.\n");
        prompt.push_str("3. image_url: a direct link to box art (.jpg/.png).\n");
        prompt.push_str("4. Use null when you do not know a working link.\n\n");

        prompt.push_str("## Required Response Format\n\n");
        prompt.push_str("```json\n");
        prompt.push_str("{\"official_url\": null, \"amazon_url\": null, \"image_url\": null}\n");
        prompt.push_str("```\n");

        prompt
    }
}
