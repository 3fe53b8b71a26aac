// ABOUTME: Role system prompt builder: assembles role description, device location, and time.
// ABOUTME: Produces the system message that leads every generation context of a session.

use chrono::{DateTime, Local};

/// Timestamp layout used in the "current time" layer.
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Assembles the per-session system prompt from layered sources: the role
/// description, the device's location and the current local time.
///
/// A prompt is only produced when the role carries a description; location
/// and time alone are not worth a system message.
#[derive(Debug, Clone)]
pub struct RolePromptBuilder {
    pub description: Option<String>,
    pub location: Option<String>,
    pub now: DateTime<Local>,
}

impl RolePromptBuilder {
    pub fn new(description: Option<&str>, location: Option<&str>) -> Self {
        Self {
            description: non_empty(description),
            location: non_empty(location),
            now: Local::now(),
        }
    }

    /// Pin the "current time" layer, mostly for tests.
    pub fn at(mut self, now: DateTime<Local>) -> Self {
        self.now = now;
        self
    }

    /// Joins the non-empty layers with newlines, or `None` without a role description.
    pub fn build(&self) -> Option<String> {
        let description = self.description.as_deref()?;

        let layers: Vec<String> = [
            Some(format!("Role description: {}", description)),
            self.location.as_deref().map(|loc| {
                format!(
                    "Current location: {}. If the user says they are somewhere else, prefer the new place.",
                    loc
                )
            }),
            Some(format!("Current time: {}", self.now.format(TIME_FORMAT))),
        ]
        .into_iter()
        .flatten()
        .collect();

        Some(layers.join("\n"))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
