// Topic layout: every topic is a template with one `{placeholder}`, rendered
// under a configurable base topic.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_BASE_TOPIC: &str = "octoPrint/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TopicTemplate {
    #[serde(rename = "baseTopic")]
    Base,
    #[serde(rename = "eventTopic")]
    Event,
    #[serde(rename = "progressTopic")]
    Progress,
    #[serde(rename = "temperatureTopic")]
    Temperature,
    #[serde(rename = "lwTopic")]
    LastWill,
    #[serde(rename = "hassTopic")]
    Hass,
    #[serde(rename = "controlTopic")]
    Control,
}

impl TopicTemplate {
    pub const ALL: [TopicTemplate; 7] = [
        TopicTemplate::Base,
        TopicTemplate::Event,
        TopicTemplate::Progress,
        TopicTemplate::Temperature,
        TopicTemplate::LastWill,
        TopicTemplate::Hass,
        TopicTemplate::Control,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TopicTemplate::Base => "baseTopic",
            TopicTemplate::Event => "eventTopic",
            TopicTemplate::Progress => "progressTopic",
            TopicTemplate::Temperature => "temperatureTopic",
            TopicTemplate::LastWill => "lwTopic",
            TopicTemplate::Hass => "hassTopic",
            TopicTemplate::Control => "controlTopic",
        }
    }

    pub fn default_template(self) -> &'static str {
        match self {
            TopicTemplate::Base => DEFAULT_BASE_TOPIC,
            TopicTemplate::Event => "event/{event}",
            TopicTemplate::Progress => "progress/{progress}",
            TopicTemplate::Temperature => "temperature/{temp}",
            TopicTemplate::LastWill => "mqtt",
            TopicTemplate::Hass => "hass/{hass}",
            TopicTemplate::Control => "hassControl/{control}",
        }
    }
}

impl fmt::Display for TopicTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown topic template '{0}'")]
pub struct UnknownTemplate(pub String);

impl FromStr for TopicTemplate {
    type Err = UnknownTemplate;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TopicTemplate::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| UnknownTemplate(s.to_string()))
    }
}

/// Renders topics from the template catalog. Templates that were never
/// overridden resolve to their documented defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicResolver {
    #[serde(default)]
    overrides: BTreeMap<TopicTemplate, String>,
}

impl TopicResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, template: TopicTemplate, value: impl Into<String>) -> Self {
        self.set(template, value);
        self
    }

    pub fn set(&mut self, template: TopicTemplate, value: impl Into<String>) {
        self.overrides.insert(template, value.into());
    }

    pub fn template(&self, template: TopicTemplate) -> &str {
        self.overrides
            .get(&template)
            .map(String::as_str)
            .unwrap_or_else(|| template.default_template())
    }

    /// `full` (and `baseTopic` itself) prefixes the base topic; otherwise the
    /// result is relative, suitable for use behind a `~` abbreviation.
    pub fn resolve(&self, template: TopicTemplate, suffix: &str, full: bool) -> String {
        let mut topic = String::new();
        if full || template == TopicTemplate::Base {
            topic.push_str(self.template(TopicTemplate::Base));
        }
        if template != TopicTemplate::Base {
            topic.push_str(&strip_placeholder(self.template(template)));
        }
        topic.push_str(suffix);
        topic
    }

    pub fn base(&self) -> String {
        self.resolve(TopicTemplate::Base, "", true)
    }

    pub fn full(&self, template: TopicTemplate, suffix: &str) -> String {
        self.resolve(template, suffix, true)
    }

    /// Relative topic behind the `~` base abbreviation.
    pub fn relative(&self, template: TopicTemplate, suffix: &str) -> String {
        format!("~{}", self.resolve(template, suffix, false))
    }
}

// Greedy: drops everything from the first `{` through the last `}`.
fn strip_placeholder(template: &str) -> String {
    let Some(open) = template.find('{') else {
        return template.to_string();
    };
    match template.rfind('}') {
        Some(close) if close > open => {
            let mut out = String::with_capacity(template.len());
            out.push_str(&template[..open]);
            out.push_str(&template[close + 1..]);
            out
        }
        _ => template.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_strip_placeholder() {
        let r = TopicResolver::new();
        assert_eq!(r.resolve(TopicTemplate::Event, "", false), "event/");
        assert_eq!(r.resolve(TopicTemplate::Hass, "is_printing", false), "hass/is_printing");
        assert_eq!(r.resolve(TopicTemplate::LastWill, "", false), "mqtt");
        assert_eq!(r.resolve(TopicTemplate::Control, "jog", true), "octoPrint/hassControl/jog");
    }

    #[test]
    fn base_topic_is_always_full() {
        let r = TopicResolver::new();
        assert_eq!(r.resolve(TopicTemplate::Base, "", false), "octoPrint/");
        assert_eq!(r.resolve(TopicTemplate::Base, "x", true), "octoPrint/x");
    }

    #[test]
    fn full_is_base_plus_relative() {
        let r = TopicResolver::new().with_override(TopicTemplate::Base, "printers/mk4/");
        for t in TopicTemplate::ALL.into_iter().filter(|t| *t != TopicTemplate::Base) {
            let expected = format!("{}{}", r.base(), r.resolve(t, "tool0", false));
            assert_eq!(r.resolve(t, "tool0", true), expected, "{t}");
        }
    }

    #[test]
    fn overrides_replace_defaults() {
        let r = TopicResolver::new().with_override(TopicTemplate::Temperature, "temps/{temp}/now");
        assert_eq!(r.resolve(TopicTemplate::Temperature, "bed", false), "temps//nowbed");
        assert_eq!(r.relative(TopicTemplate::Temperature, ""), "~temps//now");
    }

    #[test]
    fn template_names_round_trip() {
        assert_eq!("lwTopic".parse::<TopicTemplate>(), Ok(TopicTemplate::LastWill));
        let err = "fooTopic".parse::<TopicTemplate>().unwrap_err();
        assert_eq!(err.to_string(), "unknown topic template 'fooTopic'");
    }
}
