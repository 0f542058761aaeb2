use log::warn;
use std::collections::HashMap;
use std::path::Path;

use crate::config::constants;
use crate::error::{ConfigError, RenderError};
use crate::job_state::EventKind;
use crate::status::NormalizedStatus;

/// Template used for any event without its own entry.
pub const DEFAULT_TEMPLATE: &str = "**{{CURRENT_STATUS}} {{PRINT_NAME}}:**\nLayer: {{CURRENT_LAYER}} / {{TOTAL_LAYERS}} *({{PERCENTAGE}} %)*\nREMAINING: {{REMAINING}}";

/// Turns an event and its status into the text posted to webhooks.
pub trait Render: Send {
    fn render(&self, event: EventKind, status: &NormalizedStatus) -> Result<String, RenderError>;
}

/// Per-event message templates with `{{NAME}}` placeholders.
#[derive(Debug, Clone, Default)]
pub struct MessageTemplates {
    templates: HashMap<String, String>,
}

impl MessageTemplates {
    pub fn new(templates: HashMap<String, String>) -> Self {
        Self { templates }
    }

    /// Load templates from a JSON object keyed by event name.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let read_error = |reason: String| ConfigError::FileReadError {
            path: path.display().to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| read_error(e.to_string()))?;
        let templates: HashMap<String, String> =
            serde_json::from_str(&text).map_err(|e| read_error(e.to_string()))?;
        for key in templates.keys() {
            if !EventKind::ALL.iter().any(|kind| kind.name() == key) {
                warn!("Ignoring template for unknown event '{}'", key);
            }
        }
        Ok(Self::new(templates))
    }

    fn template_for(&self, event: EventKind) -> &str {
        self.templates
            .get(event.name())
            .map(String::as_str)
            .unwrap_or(DEFAULT_TEMPLATE)
    }
}

impl Render for MessageTemplates {
    fn render(&self, event: EventKind, status: &NormalizedStatus) -> Result<String, RenderError> {
        let template = self.template_for(event);
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| RenderError::Unterminated {
                event: event.name().to_string(),
            })?;
            let name = after[..end].trim();
            let value =
                placeholder(name, event, status).ok_or_else(|| RenderError::UnknownPlaceholder {
                    event: event.name().to_string(),
                    name: name.to_string(),
                })?;
            out.push_str(&value);
            rest = &after[end + 2..];
        }
        out.push_str(rest);

        Ok(out)
    }
}

fn placeholder(name: &str, event: EventKind, status: &NormalizedStatus) -> Option<String> {
    let record = &status.record;
    let value = match name {
        "CURRENT_STATUS" => status.state().display_text().to_string(),
        "CURRENT_LAYER" => record.layer().to_string(),
        "TOTAL_LAYERS" => record.total_layers().to_string(),
        "PERCENTAGE" => status.percent.to_string(),
        "REMAINING" => format_time(record.mc_remaining_time.unwrap_or(0)),
        "PRINT_NAME" => format_file(record.gcode_file.as_deref(), record.subtask_name.as_deref()),
        "STAGE" => status.stage_name.clone(),
        "EVENT" => event.name().to_string(),
        _ => return None,
    };
    Some(value)
}

/// Join with an Oxford comma: `a`, `a and b`, `a, b, and c`.
pub fn oxford_join(parts: &[String]) -> String {
    match parts {
        [] => String::new(),
        [one] => one.clone(),
        [a, b] => format!("{} and {}", a, b),
        [init @ .., last] => format!("{}, and {}", init.join(", "), last),
    }
}

/// Format a duration in minutes as days, hours and minutes.
pub fn format_time(minutes: i64) -> String {
    if minutes <= 0 {
        return "0 minutes".to_string();
    }

    let days = minutes / (24 * 60);
    let hours = (minutes % (24 * 60)) / 60;
    let mins = minutes % 60;

    let mut parts = Vec::new();
    for (amount, unit) in [(days, "day"), (hours, "hour"), (mins, "minute")] {
        if amount > 0 {
            let plural = if amount > 1 { "s" } else { "" };
            parts.push(format!("{} {}{}", amount, unit, plural));
        }
    }

    oxford_join(&parts)
}

/// Print name from the gcode file or subtask name, without model extension.
pub fn format_file(gcode_file: Option<&str>, subtask_name: Option<&str>) -> String {
    let name = [gcode_file, subtask_name]
        .into_iter()
        .flatten()
        .find(|n| !n.is_empty());

    let Some(name) = name else {
        return "Unknown File".to_string();
    };

    match name.rsplit_once('.') {
        Some((stem, ext)) if constants::MODEL_EXTENSIONS.contains(&ext) => stem.to_string(),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_time_with_oxford_comma() {
        assert_eq!(format_time(0), "0 minutes");
        assert_eq!(format_time(1), "1 minute");
        assert_eq!(format_time(61), "1 hour and 1 minute");
        assert_eq!(format_time(24 * 60 + 125), "1 day, 2 hours, and 5 minutes");
        assert_eq!(format_time(2 * 24 * 60), "2 days");
    }

    #[test]
    fn strips_model_extensions_only() {
        assert_eq!(format_file(Some("benchy.3mf"), None), "benchy");
        assert_eq!(format_file(Some("plate_1.gcode"), None), "plate_1.gcode");
        assert_eq!(format_file(Some(""), Some("cube.stl")), "cube");
        assert_eq!(format_file(None, None), "Unknown File");
    }
}
