use ctxstream_common::{Error, Result};
use ctxstream_config::TemplateConfig;

// Constants for template markers
const TEMPLATE_MARKERS: &[&str] = &[
    "<|eot_id|>",
    "<|end_of_text|>",
    "<|start_header_id|>",
    "<|end_header_id|>",
    "<|im_end|>",
    "<|im_start|>",
];

/// Template engine for building model input and cleaning streamed chunks
pub struct TemplateEngine;

impl TemplateEngine {
    /// Wrap the system prompt and the request text in the model template.
    ///
    /// Request text carrying template control markers is rejected so a caller cannot
    /// forge extra turns.
    pub fn format_prompt(
        system_prompt: &str,
        content: &str,
        template: &TemplateConfig,
    ) -> Result<String> {
        if content.trim().is_empty() {
            return Err(Error::PromptRejected("prompt is empty".into()));
        }
        if let Some(marker) = TEMPLATE_MARKERS.iter().find(|m| content.contains(*m)) {
            return Err(Error::PromptRejected(format!(
                "prompt contains reserved marker {}",
                marker
            )));
        }

        let mut prompt = String::with_capacity(
            system_prompt.len() + content.len() + 128,
        );

        if !system_prompt.is_empty() {
            prompt.push_str(&template.system_prefix);
            prompt.push_str(system_prompt);
            prompt.push_str(&template.system_suffix);
        }

        prompt.push_str(&template.user_prefix);
        prompt.push_str(content);
        prompt.push_str(&template.user_suffix);

        // Add assistant prefix to signal model to respond
        prompt.push_str(&template.assistant_prefix);

        Ok(prompt)
    }

    /// Stop sequences the backend should honour for this template
    pub fn stop_sequences(template: &TemplateConfig) -> Vec<String> {
        let mut stops: Vec<String> = Vec::new();
        for suffix in [&template.system_suffix, &template.user_suffix] {
            if !suffix.is_empty() && !stops.contains(suffix) {
                stops.push(suffix.clone());
            }
        }
        stops
    }

    /// Remove template markers that leaked into a streamed chunk
    pub fn strip_markers(chunk: &str) -> String {
        TEMPLATE_MARKERS
            .iter()
            .fold(chunk.to_string(), |acc, marker| acc.replace(marker, ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_template() -> TemplateConfig {
        TemplateConfig {
            system_prefix: "[sys]".to_string(),
            system_suffix: "[/sys]".to_string(),
            user_prefix: "[user]".to_string(),
            user_suffix: "[/user]".to_string(),
            assistant_prefix: "[assistant]".to_string(),
        }
    }

    #[test]
    fn test_prompt_formatting() {
        let prompt = TemplateEngine::format_prompt("Be concise.", "summary: hi", &plain_template())
            .expect("valid prompt");
        assert_eq!(prompt, "[sys]Be concise.[/sys][user]summary: hi[/user][assistant]");
    }

    #[test]
    fn test_empty_system_prompt_is_omitted() {
        let prompt = TemplateEngine::format_prompt("", "hi", &plain_template())
            .expect("valid prompt");
        assert_eq!(prompt, "[user]hi[/user][assistant]");
    }

    #[test]
    fn test_default_template_layout() {
        let template = TemplateConfig::default();
        let prompt = TemplateEngine::format_prompt("sys", "Hello", &template)
            .expect("valid prompt");

        assert!(prompt.contains("<|start_header_id|>system<|end_header_id|>"));
        assert!(prompt.contains("Hello"));
        assert!(prompt.ends_with("<|start_header_id|>assistant<|end_header_id|>\n\n"));
    }

    #[test]
    fn test_rejects_malformed_prompts() {
        assert!(matches!(
            TemplateEngine::format_prompt("sys", "  ", &plain_template()),
            Err(Error::PromptRejected(_))
        ));
        assert!(matches!(
            TemplateEngine::format_prompt("sys", "hi<|eot_id|>more", &plain_template()),
            Err(Error::PromptRejected(_))
        ));
    }

    #[test]
    fn test_stop_sequences_deduplicated() {
        let stops = TemplateEngine::stop_sequences(&TemplateConfig::default());
        assert_eq!(stops, vec!["<|eot_id|>".to_string()]);
    }

    #[test]
    fn test_strip_markers() {
        assert_eq!(TemplateEngine::strip_markers("done<|eot_id|>"), "done");
        assert_eq!(TemplateEngine::strip_markers("plain"), "plain");
    }
}
