//! System message composition and placeholder rendering.

use tracing::trace;

/// Values substituted into `{{name}}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholders {
    pub username: String,
    pub os: String,
    pub cwd: String,
}

impl Placeholders {
    /// Read the values from the running process.
    pub fn from_env() -> Self {
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "user".into());
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        Self {
            username,
            os: std::env::consts::OS.into(),
            cwd,
        }
    }
}

/// Build the system message from its parts.
///
/// The persona comes first, then each language note, the custom
/// instructions and the computer API description. A part already present
/// verbatim is not repeated.
pub fn compose(
    persona: &str,
    language_notes: &[String],
    custom_instructions: &str,
    api_description: Option<&str>,
) -> String {
    let mut message = persona.to_string();

    let parts = language_notes
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(custom_instructions))
        .chain(api_description);

    for part in parts {
        if part.trim().is_empty() || message.contains(part) {
            continue;
        }
        message.push_str("\n\n");
        message.push_str(part);
    }

    trace!(chars = message.len(), "Composed system message");
    message
}

/// Replace `{{username}}`, `{{os}}` and `{{cwd}}`. Unknown placeholders stay.
pub fn render(template: &str, values: &Placeholders) -> String {
    template
        .replace("{{username}}", &values.username)
        .replace("{{os}}", &values.os)
        .replace("{{cwd}}", &values.cwd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_are_appended_in_order() {
        let notes = vec!["Python note.".to_string(), "Shell note.".to_string()];
        let message = compose("Persona.", &notes, "Be brief.", Some("API."));
        assert_eq!(
            message,
            "Persona.\n\nPython note.\n\nShell note.\n\nBe brief.\n\nAPI."
        );
    }

    #[test]
    fn parts_already_present_are_skipped() {
        let notes = vec!["Use python.".to_string()];
        let message = compose("Persona. Use python.", &notes, "", Some("Persona."));
        assert_eq!(message, "Persona. Use python.");
    }

    #[test]
    fn api_description_only_when_given() {
        assert_eq!(compose("P", &[], "", None), "P");
    }

    #[test]
    fn placeholders_are_rendered() {
        let values = Placeholders {
            username: "ada".into(),
            os: "linux".into(),
            cwd: "/home/ada".into(),
        };
        let out = render("Hi {{username}} on {{os}} in {{cwd}} {{other}}", &values);
        assert_eq!(out, "Hi ada on linux in /home/ada {{other}}");
    }
}
