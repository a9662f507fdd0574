//! Forwarding rules and the rule repository port.

pub mod cache;
mod repository;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{domain::ChannelId, Result};

pub use repository::InMemoryRuleRepository;

/// A relay rule. Owned by the rule store; read-only to the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardingRule {
    pub rule_name: String,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    pub source_channel_id: ChannelId,
    #[serde(default)]
    pub target_channel_ids: Vec<ChannelId>,
    #[serde(default)]
    pub filter_options: FilterOptions,
    #[serde(default)]
    pub edit_options: EditOptions,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    #[serde(default)]
    pub contains_text: Option<String>,
    /// Treat `contains_text` as a regex instead of a literal.
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default)]
    pub allowed_sender_ids: BTreeSet<i64>,
    #[serde(default)]
    pub blocked_sender_ids: BTreeSet<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EditOptions {
    pub prepend_text: Option<String>,
    pub append_text: Option<String>,
    pub custom_footer: Option<String>,
    pub text_replacements: Vec<TextReplacement>,
    pub remove_links: bool,
    pub strip_formatting: bool,
    pub drop_media_captions: bool,
    pub no_forwards: bool,
    pub remove_source_forward_header: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextReplacement {
    pub find: String,
    #[serde(default)]
    pub replace_with: String,
    #[serde(default)]
    pub is_regex: bool,
}

impl EditOptions {
    /// True if any option rewrites the message content itself.
    pub fn alters_content(&self) -> bool {
        non_empty(&self.prepend_text)
            || non_empty(&self.append_text)
            || non_empty(&self.custom_footer)
            || !self.text_replacements.is_empty()
            || self.remove_links
            || self.strip_formatting
            || self.drop_media_captions
            || self.no_forwards
    }
}

fn non_empty(v: &Option<String>) -> bool {
    v.as_deref().is_some_and(|s| !s.is_empty())
}

impl ForwardingRule {
    pub fn validate(&self) -> Result<()> {
        if self.rule_name.trim().is_empty() {
            return Err(crate::Error::Config("rule is missing ruleName".to_string()));
        }
        Ok(())
    }
}

/// Hexagonal port for the rule store. CRUD only.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn get_by_name(&self, name: &str) -> Result<Option<ForwardingRule>>;
    async fn get_all(&self) -> Result<Vec<ForwardingRule>>;
    async fn get_by_source_channel(&self, source: ChannelId) -> Result<Vec<ForwardingRule>>;
    async fn add(&self, rule: ForwardingRule) -> Result<()>;
    async fn update(&self, rule: ForwardingRule) -> Result<()>;
    async fn delete(&self, name: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_rule_with_defaults() {
        let raw = r#"{
          "ruleName": "news",
          "sourceChannelId": -1001,
          "targetChannelIds": [-2001, -2002],
          "filterOptions": { "containsText": "alpha", "allowedSenderIds": [7] },
          "editOptions": {
            "prependText": "[NEWS] ",
            "textReplacements": [{ "find": "foo", "replaceWith": "bar" }]
          }
        }"#;
        let rule: ForwardingRule = serde_json::from_str(raw).unwrap();
        assert!(rule.is_enabled);
        assert_eq!(rule.target_channel_ids.len(), 2);
        assert_eq!(rule.filter_options.contains_text.as_deref(), Some("alpha"));
        assert!(rule.filter_options.allowed_sender_ids.contains(&7));
        assert!(!rule.edit_options.text_replacements[0].is_regex);
        assert!(rule.edit_options.alters_content());
    }

    #[test]
    fn header_and_empty_strings_do_not_alter_content() {
        let opts = EditOptions {
            prepend_text: Some(String::new()),
            remove_source_forward_header: true,
            ..Default::default()
        };
        assert!(!opts.alters_content());
    }
}
