//! Caption templates
//!
//! A template is a caption body with `{name}` placeholders. Built-in templates
//! cover common post types; custom ones come from `[templates.<name>]` in the
//! configuration. `{date}`, `{time}` and `{year}` are filled in automatically
//! unless the caller provides them.

use std::collections::BTreeMap;

use chrono::Local;

use crate::config::Config;
use crate::error::{ConfigError, CrosspostError, Result};

const BUILTIN: &[(&str, &str, &str)] = &[
    (
        "Announcement",
        "general",
        "📢 ANNOUNCEMENT\n\n{content}\n\n#announcement #news #update",
    ),
    (
        "Quote",
        "inspirational",
        "💭 \"{content}\"\n\n- {author}\n\n#quote #inspiration #motivation #wisdom",
    ),
    (
        "Product Showcase",
        "business",
        "✨ Introducing: {title}\n\n{content}\n\n🛒 Available now!\n\n#product #showcase #new",
    ),
    (
        "Event Promotion",
        "event",
        "🎉 EVENT ALERT!\n\n📅 {date}\n📍 {location}\n⏰ {time}\n\n{content}\n\n#event #joinus #dontmiss",
    ),
    (
        "Behind the Scenes",
        "creative",
        "🎬 Behind the Scenes\n\n{content}\n\n#bts #behindthescenes #makingof #process",
    ),
    (
        "Tip/Tutorial",
        "educational",
        "💡 Pro Tip:\n\n{content}\n\n#tip #tutorial #howto #learn",
    ),
    (
        "Thank You",
        "general",
        "🙏 Thank You!\n\n{content}\n\n#thankyou #grateful #appreciation",
    ),
    (
        "Question/Poll",
        "engagement",
        "❓ Question for you:\n\n{content}\n\nLet us know in the comments! 👇\n\n#question #poll #engagement",
    ),
    (
        "Milestone",
        "celebration",
        "🎊 Milestone Alert!\n\n{content}\n\n#milestone #celebration #achievement #grateful",
    ),
    ("Simple", "general", "{content}\n\n{hashtags}"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub name: String,
    pub category: String,
    pub body: String,
}

impl Template {
    /// Placeholder names in order of first appearance
    pub fn variables(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in placeholders(&self.body) {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    /// Substitute every placeholder
    ///
    /// # Errors
    ///
    /// `InvalidInput` naming the placeholders with no value.
    pub fn apply(&self, values: &BTreeMap<String, String>) -> Result<String> {
        let now = Local::now();
        let automatic = [
            ("date", now.format("%B %d, %Y").to_string()),
            ("time", now.format("%I:%M %p").to_string()),
            ("year", now.format("%Y").to_string()),
        ];
        let lookup = |name: &str| -> Option<String> {
            values.get(name).cloned().or_else(|| {
                automatic
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| value.clone())
            })
        };

        let missing: Vec<String> = self
            .variables()
            .into_iter()
            .filter(|name| lookup(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(CrosspostError::InvalidInput(format!(
                "Template '{}' needs a value for: {}",
                self.name,
                missing.join(", ")
            )));
        }

        let mut caption = self.body.clone();
        for name in self.variables() {
            if let Some(value) = lookup(&name) {
                caption = caption.replace(&format!("{{{}}}", name), &value);
            }
        }
        Ok(caption.trim_end().to_string())
    }
}

/// `{word}` spans in `body`, skipping braces around anything else
fn placeholders(body: &str) -> impl Iterator<Item = &str> {
    body.split('{').skip(1).filter_map(|part| {
        let (name, _) = part.split_once('}')?;
        let valid = !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_');
        valid.then_some(name)
    })
}

/// Built-in templates followed by custom ones
#[derive(Debug, Clone)]
pub struct TemplateSet {
    templates: Vec<Template>,
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateSet {
    pub fn builtin() -> Self {
        let templates = BUILTIN
            .iter()
            .map(|(name, category, body)| Template {
                name: name.to_string(),
                category: category.to_string(),
                body: body.to_string(),
            })
            .collect();
        Self { templates }
    }

    /// Built-ins plus `[templates.<name>]` entries
    ///
    /// A custom template may not reuse a built-in name.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut set = Self::builtin();
        for (name, custom) in &config.templates {
            if set.get(name).is_some() {
                return Err(ConfigError::InvalidValue {
                    field: format!("templates.{}", name),
                    reason: "a template with this name already exists".to_string(),
                }
                .into());
            }
            set.templates.push(Template {
                name: name.clone(),
                category: custom.category.clone(),
                body: custom.template.clone(),
            });
        }
        Ok(set)
    }

    /// Look up a template by name, ignoring case
    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.iter()
    }

    pub fn by_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a Template> + 'a {
        self.templates.iter().filter(move |t| t.category == category)
    }

    /// Sorted, without duplicates
    pub fn categories(&self) -> Vec<&str> {
        let mut categories: Vec<&str> = self.templates.iter().map(|t| t.category.as_str()).collect();
        categories.sort_unstable();
        categories.dedup();
        categories
    }
}

/// Normalize a hashtag list ("sunset, #beach travel") to "#sunset #beach #travel"
pub fn format_hashtags(input: &str) -> String {
    input
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|tag| tag.trim_start_matches('#'))
        .filter(|tag| !tag.is_empty())
        .map(|tag| format!("#{}", tag))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TemplateConfig;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_builtin_lookup_ignores_case() {
        let set = TemplateSet::builtin();
        assert_eq!(set.iter().count(), 10);
        assert_eq!(set.get("quote").unwrap().name, "Quote");
        assert!(set.get("Limerick").is_none());
    }

    #[test]
    fn test_variables_in_order() {
        let set = TemplateSet::builtin();
        assert_eq!(
            set.get("Event Promotion").unwrap().variables(),
            vec!["date", "location", "time", "content"]
        );
        assert_eq!(set.get("Simple").unwrap().variables(), vec!["content", "hashtags"]);
    }

    #[test]
    fn test_placeholders_skip_non_identifiers() {
        let names: Vec<&str> = placeholders("{a} { b } {} {c_1} {unclosed").collect();
        assert_eq!(names, vec!["a", "c_1"]);
    }

    #[test]
    fn test_apply_substitutes_values() {
        let set = TemplateSet::builtin();
        let caption = set
            .get("Quote")
            .unwrap()
            .apply(&values(&[("content", "Stay hungry"), ("author", "Someone")]))
            .unwrap();
        assert!(caption.starts_with("💭 \"Stay hungry\"\n\n- Someone"));
        assert!(!caption.contains('{'));
    }

    #[test]
    fn test_apply_fills_date_and_time() {
        let set = TemplateSet::builtin();
        let caption = set
            .get("Event Promotion")
            .unwrap()
            .apply(&values(&[("content", "Come along"), ("location", "The park")]))
            .unwrap();
        assert!(caption.contains(&Local::now().format("%Y").to_string()));
        assert!(caption.contains("📍 The park"));
    }

    #[test]
    fn test_apply_reports_missing_values() {
        let set = TemplateSet::builtin();
        let err = set
            .get("Product Showcase")
            .unwrap()
            .apply(&values(&[]))
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("needs a value for: title, content"));
    }

    #[test]
    fn test_simple_without_hashtags_has_no_trailing_blank() {
        let set = TemplateSet::builtin();
        let caption = set
            .get("simple")
            .unwrap()
            .apply(&values(&[("content", "Hello"), ("hashtags", "")]))
            .unwrap();
        assert_eq!(caption, "Hello");
    }

    #[test]
    fn test_custom_templates_from_config() {
        let mut config = Config::default_config();
        config.templates.insert(
            "Weekly".to_string(),
            TemplateConfig {
                template: "This week: {content}".to_string(),
                category: "custom".to_string(),
            },
        );
        let set = TemplateSet::from_config(&config).unwrap();
        assert_eq!(set.iter().count(), 11);
        assert_eq!(set.by_category("custom").count(), 1);
        assert!(set.categories().contains(&"custom"));

        config.templates.insert(
            "quote".to_string(),
            TemplateConfig {
                template: "{content}".to_string(),
                category: "custom".to_string(),
            },
        );
        let err = TemplateSet::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("templates.quote"));
    }

    #[test]
    fn test_format_hashtags() {
        assert_eq!(format_hashtags("sunset, #beach  travel"), "#sunset #beach #travel");
        assert_eq!(format_hashtags(" , "), "");
    }
}
