//! `LocalComputer`: a `Computer` backed by local interpreter subprocesses.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use codeloop_config::ComputerConfig;
use codeloop_core::computer::{
    strip_volatile, Computer, ExecutionFlags, OutputStream, Snapshot, SCRIPTING_LANGUAGE,
};
use codeloop_core::error::ExecutionError;
use serde_json::Value;
use tracing::debug;

use crate::language::LanguageTable;
use crate::subprocess::{self, RunRequest};

/// Environment variable naming the file that backs the injected `computer` object.
pub const STATE_FILE_ENV: &str = "CODELOOP_STATE_FILE";

const API_DESCRIPTION: &str = "A python `computer` object is already available in every python block; never import it.
- `computer.to_dict()` returns the shared state dictionary.
- `computer.load_dict(d)` replaces the shared state dictionary.
- `computer.state` is a plain dict you may read and update; call `computer.save()` to persist it.";

/// Defines the injected `computer` object for python blocks.
const PYTHON_PRELUDE: &str = r#"import json as _cl_json, os as _cl_os
class _Computer:
    _path = _cl_os.environ.get("CODELOOP_STATE_FILE")
    def to_dict(self):
        try:
            with open(self._path) as f:
                return _cl_json.load(f)
        except Exception:
            return {}
    def load_dict(self, d):
        with open(self._path, "w") as f:
            _cl_json.dump(d, f)
    @property
    def state(self):
        if not hasattr(self, "_state"):
            self._state = self.to_dict()
        return self._state
    def save(self):
        self.load_dict(self.state)
computer = _Computer()
"#;

/// A computer that runs code blocks in local subprocesses.
pub struct LocalComputer {
    languages: LanguageTable,
    flags: ExecutionFlags,
    import_computer_api: bool,
    timeout: Duration,
    /// Non-flag state, round-tripped through `to_dict`/`load_dict`
    state: Snapshot,
    /// Backing file for the python `computer` object
    state_file: PathBuf,
}

impl LocalComputer {
    pub fn new(config: &ComputerConfig) -> Self {
        let state_file =
            std::env::temp_dir().join(format!("codeloop-state-{}.json", uuid::Uuid::new_v4()));
        Self {
            languages: LanguageTable::from_config(&config.languages),
            flags: ExecutionFlags::default(),
            import_computer_api: config.import_computer_api,
            timeout: Duration::from_secs(config.timeout_secs),
            state: Snapshot::new(),
            state_file,
        }
    }

    pub fn languages(&self) -> &LanguageTable {
        &self.languages
    }

    fn flag_snapshot(&self) -> Snapshot {
        let mut map = Snapshot::new();
        map.insert("verbose".into(), Value::Bool(self.flags.verbose));
        map.insert("debug".into(), Value::Bool(self.flags.debug));
        map.insert("emit_images".into(), Value::Bool(self.flags.emit_images));
        map.insert("max_output".into(), Value::from(self.flags.max_output));
        map
    }
}

impl Drop for LocalComputer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.state_file);
    }
}

#[async_trait]
impl Computer for LocalComputer {
    fn supports(&self, language: &str) -> bool {
        self.languages.get(language).is_some()
    }

    fn language_notes(&self) -> Vec<String> {
        self.languages
            .iter()
            .filter_map(|l| l.system_message.clone())
            .collect()
    }

    fn api_description(&self) -> &str {
        API_DESCRIPTION
    }

    fn import_computer_api(&self) -> bool {
        self.import_computer_api
    }

    fn flags(&self) -> &ExecutionFlags {
        &self.flags
    }

    fn flags_mut(&mut self) -> &mut ExecutionFlags {
        &mut self.flags
    }

    async fn run(&self, language: &str, code: &str) -> Result<OutputStream, ExecutionError> {
        let runtime = self
            .languages
            .get(language)
            .ok_or_else(|| ExecutionError::UnsupportedLanguage(language.to_string()))?;

        let code = if self.import_computer_api && runtime.name == SCRIPTING_LANGUAGE {
            format!("{PYTHON_PRELUDE}{code}\n")
        } else {
            format!("{code}\n")
        };

        if self.flags.verbose {
            debug!(language = %runtime.name, bytes = code.len(), "Running code block");
        }

        subprocess::spawn(RunRequest {
            language: runtime,
            code,
            max_output: self.flags.max_output,
            timeout: self.timeout,
            env: vec![(STATE_FILE_ENV.to_string(), self.state_file.clone())],
        })
        .await
    }

    fn to_dict(&self) -> Snapshot {
        let mut map = self.state.clone();
        map.extend(self.flag_snapshot());
        map.insert(
            "languages".into(),
            Value::from(self.languages.names()),
        );
        map.insert(
            "import_computer_api".into(),
            Value::Bool(self.import_computer_api),
        );
        map.insert("_hashes".into(), Value::Object(Snapshot::new()));
        map.insert("system_message".into(), Value::from(API_DESCRIPTION));
        map
    }

    fn load_dict(&mut self, mut snapshot: Snapshot) {
        strip_volatile(&mut snapshot);
        if let Some(v) = snapshot.remove("verbose").and_then(|v| v.as_bool()) {
            self.flags.verbose = v;
        }
        if let Some(v) = snapshot.remove("debug").and_then(|v| v.as_bool()) {
            self.flags.debug = v;
        }
        if let Some(v) = snapshot.remove("emit_images").and_then(|v| v.as_bool()) {
            self.flags.emit_images = v;
        }
        if let Some(v) = snapshot.remove("max_output").and_then(|v| v.as_u64()) {
            self.flags.max_output = v as usize;
        }
        snapshot.remove("languages");
        snapshot.remove("import_computer_api");
        self.state = snapshot;
    }
}
