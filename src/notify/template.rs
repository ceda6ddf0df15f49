//! Rendering of notification content per channel
//!
//! Robot channels receive a JSON card, email an HTML body and phone calls a
//! short plain text. Routes may name a custom text template by id; the
//! placeholders `{{rule_name}}`, `{{severity}}`, `{{status}}`,
//! `{{fingerprint}}`, `{{labels}}`, `{{annotations}}`, `{{duty_user}}`,
//! `{{first_trigger_time}}` and `{{recover_time}}` are substituted.

use std::collections::HashMap;

use chrono::DateTime;
use serde_json::json;

use crate::models::{AlertEvent, ChannelRoute, NoticeKind, NoticeObject};

pub trait TemplateRenderer: Send + Sync {
    fn render(&self, event: &AlertEvent, notice: &NoticeObject, route: &ChannelRoute) -> String;
}

/// Default renderer producing channel cards
#[derive(Debug, Clone, Default)]
pub struct CardRenderer {
    templates: HashMap<String, String>,
}

impl CardRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_templates(templates: HashMap<String, String>) -> Self {
        Self { templates }
    }

    fn title(event: &AlertEvent) -> String {
        let status = if event.is_recovered {
            "RECOVERED"
        } else {
            "FIRING"
        };
        format!("[{}][{}] {}", event.severity, status, event.rule_name)
    }

    fn format_time(timestamp: i64) -> String {
        if timestamp == 0 {
            return "-".to_string();
        }
        DateTime::from_timestamp(timestamp, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| timestamp.to_string())
    }

    fn format_labels(event: &AlertEvent) -> String {
        event
            .labels
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Markdown body shared by the robot channels
    fn body(&self, event: &AlertEvent, route: &ChannelRoute) -> String {
        if let Some(template) = self.templates.get(&route.template_id) {
            return self.fill(template, event);
        }

        let mut text = format!(
            "**Rule**: {}\n**Severity**: {}\n**Fingerprint**: {}\n**Labels**: {}\n**Triggered**: {}",
            event.rule_name,
            event.severity,
            event.fingerprint,
            Self::format_labels(event),
            Self::format_time(event.first_trigger_time),
        );
        if event.is_recovered {
            text.push_str(&format!("\n**Recovered**: {}", Self::format_time(event.recover_time)));
        }
        if !event.annotations.is_empty() {
            text.push_str(&format!("\n\n{}", event.annotations));
        }
        if !event.duty_user.is_empty() {
            text.push_str(&format!("\n\n{}", event.duty_user));
        }
        text
    }

    fn fill(&self, template: &str, event: &AlertEvent) -> String {
        let status = if event.is_recovered { "recovered" } else { "firing" };
        template
            .replace("{{rule_name}}", &event.rule_name)
            .replace("{{severity}}", &event.severity.to_string())
            .replace("{{status}}", status)
            .replace("{{fingerprint}}", &event.fingerprint)
            .replace("{{labels}}", &Self::format_labels(event))
            .replace("{{annotations}}", &event.annotations)
            .replace("{{duty_user}}", &event.duty_user)
            .replace("{{first_trigger_time}}", &Self::format_time(event.first_trigger_time))
            .replace("{{recover_time}}", &Self::format_time(event.recover_time))
    }
}

impl TemplateRenderer for CardRenderer {
    fn render(&self, event: &AlertEvent, notice: &NoticeObject, route: &ChannelRoute) -> String {
        let title = Self::title(event);
        let body = self.body(event, route);

        match route.kind {
            NoticeKind::FeiShu => {
                let template = if event.is_recovered { "green" } else { "red" };
                json!({
                    "msg_type": "interactive",
                    "card": {
                        "header": {
                            "title": { "tag": "plain_text", "content": title },
                            "template": template,
                        },
                        "elements": [
                            { "tag": "div", "text": { "tag": "lark_md", "content": body } },
                            { "tag": "note", "elements": [
                                { "tag": "plain_text", "content": notice.name },
                            ]},
                        ],
                    },
                })
                .to_string()
            }
            NoticeKind::DingDing => json!({
                "msgtype": "markdown",
                "markdown": { "title": title, "text": format!("### {title}\n\n{body}") },
                "at": { "isAtAll": false },
            })
            .to_string(),
            NoticeKind::WeChat => json!({
                "msgtype": "markdown",
                "markdown": { "content": format!("### {title}\n{body}") },
            })
            .to_string(),
            NoticeKind::Slack => json!({
                "text": title,
                "blocks": [
                    { "type": "header", "text": { "type": "plain_text", "text": title } },
                    { "type": "section", "text": { "type": "mrkdwn", "text": body.replace("**", "*") } },
                ],
            })
            .to_string(),
            NoticeKind::Email => format!(
                "<h3>{}</h3><pre>{}</pre>",
                title,
                body.replace("**", "")
            ),
            NoticeKind::PhoneCall => title,
            NoticeKind::CustomHook => serde_json::to_string(event).unwrap_or_default(),
        }
    }
}
