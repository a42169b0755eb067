//! Language runtimes known to the local computer.

use codeloop_config::LanguageConfig;

/// An interpreter that reads a code block on stdin.
#[derive(Debug, Clone)]
pub struct Language {
    pub name: String,
    pub aliases: Vec<String>,
    pub command: String,
    pub args: Vec<String>,
    pub system_message: Option<String>,
}

impl Language {
    fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }
}

impl From<&LanguageConfig> for Language {
    fn from(cfg: &LanguageConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            aliases: cfg.aliases.clone(),
            command: cfg.command.clone(),
            args: cfg.args.clone(),
            system_message: cfg.system_message.clone(),
        }
    }
}

/// Lookup table from language name or alias to runtime.
#[derive(Debug, Clone, Default)]
pub struct LanguageTable {
    languages: Vec<Language>,
}

impl LanguageTable {
    pub fn new(languages: Vec<Language>) -> Self {
        Self { languages }
    }

    pub fn from_config(configs: &[LanguageConfig]) -> Self {
        Self::new(configs.iter().map(Language::from).collect())
    }

    /// Find a runtime by name or alias, ignoring case and surrounding space.
    pub fn get(&self, name: &str) -> Option<&Language> {
        let name = name.trim();
        self.languages.iter().find(|l| l.matches(name))
    }

    pub fn names(&self) -> Vec<&str> {
        self.languages.iter().map(|l| l.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Language> {
        self.languages.iter()
    }
}
