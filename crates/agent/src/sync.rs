//! Mirroring the computer snapshot into the scripting runtime.
//!
//! Before a python block runs, the host snapshot is loaded into the
//! runtime's `computer` object; afterwards the runtime's view is read back
//! and replaces the host snapshot. Volatile keys never cross either way.

use codeloop_core::computer::{strip_volatile, Computer, OutputLine, Snapshot, SCRIPTING_LANGUAGE};
use codeloop_core::error::{Error, Result};
use tracing::debug;

/// Prints the runtime's snapshot, minus volatile keys, as one JSON line.
pub const PULL_CODE: &str = "import json
computer_dict = computer.to_dict()
computer_dict.pop('_hashes', None)
computer_dict.pop('system_message', None)
print(json.dumps(computer_dict))";

const PUSH_PREFIX: &str = "import json\ncomputer.load_dict(json.loads(r'''";
const PUSH_SUFFIX: &str = "'''))";

/// Python code that loads `snapshot` into the runtime.
///
/// Single quotes are escaped as JSON unicode escapes so the payload can
/// never close the raw string early.
pub fn push_code(snapshot: &Snapshot) -> Result<String> {
    let json = serde_json::to_string(snapshot)?.replace('\'', "\\u0027");
    Ok(format!("{PUSH_PREFIX}{json}{PUSH_SUFFIX}"))
}

/// The JSON payload of code built by [`push_code`].
pub fn pushed_payload(code: &str) -> Option<&str> {
    code.strip_prefix(PUSH_PREFIX)?.strip_suffix(PUSH_SUFFIX)
}

/// Run sync code with the per-line output cap lifted.
///
/// A snapshot travels as a single JSON line and must arrive whole; the cap
/// is restored before returning.
async fn run_uncapped(computer: &mut dyn Computer, code: &str) -> Result<Vec<OutputLine>> {
    let cap = computer.flags().max_output;
    computer.flags_mut().max_output = usize::MAX;
    let result = computer.run_to_end(SCRIPTING_LANGUAGE, code).await;
    computer.flags_mut().max_output = cap;
    Ok(result?)
}

/// Load the host snapshot into the runtime.
pub async fn push(computer: &mut dyn Computer) -> Result<()> {
    let mut snapshot = computer.to_dict();
    strip_volatile(&mut snapshot);
    let code = push_code(&snapshot)?;
    run_uncapped(computer, &code).await?;
    debug!(keys = snapshot.len(), "Pushed computer snapshot");
    Ok(())
}

/// Read the runtime snapshot back and load it into the host.
pub async fn pull(computer: &mut dyn Computer) -> Result<()> {
    let lines = run_uncapped(computer, PULL_CODE).await?;
    let text = lines
        .iter()
        .rev()
        .find_map(|line| match line {
            OutputLine::Output { content } if !content.trim().is_empty() => Some(content.as_str()),
            _ => None,
        })
        .ok_or_else(|| Error::Sync("runtime printed no snapshot".into()))?;

    let snapshot = parse_snapshot(text)?;
    debug!(keys = snapshot.len(), "Pulled computer snapshot");
    computer.load_dict(snapshot);
    Ok(())
}

/// Parse a printed snapshot, tolerating stray surrounding quotes.
pub fn parse_snapshot(text: &str) -> Result<Snapshot> {
    let text = text.trim().trim_matches('"').trim_matches('\'');
    match serde_json::from_str(text)? {
        serde_json::Value::Object(mut map) => {
            strip_volatile(&mut map);
            Ok(map)
        }
        other => Err(Error::Sync(format!("expected a JSON object, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::FakeComputer;
    use serde_json::json;

    fn snapshot(value: serde_json::Value) -> Snapshot {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn push_code_embeds_json() {
        let code = push_code(&snapshot(json!({"cwd": "/tmp"}))).unwrap();
        assert!(code.starts_with("import json\ncomputer.load_dict(json.loads("));
        assert_eq!(pushed_payload(&code), Some(r#"{"cwd":"/tmp"}"#));
    }

    #[test]
    fn quotes_cannot_break_out() {
        let snap = snapshot(json!({"note": "it's '''here'''"}));
        let code = push_code(&snap).unwrap();
        let payload = pushed_payload(&code).unwrap();
        assert!(!payload.contains('\''));
        let back: Snapshot = serde_json::from_str(payload).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn parse_tolerates_quotes_and_strips_volatile() {
        let parsed = parse_snapshot("'{\"a\": 1, \"_hashes\": {}}'\n").unwrap();
        assert_eq!(parsed, snapshot(json!({"a": 1})));
    }

    #[tokio::test]
    async fn large_snapshot_survives_the_output_cap() {
        let mut computer = FakeComputer::new();
        computer.flags_mut().max_output = 100;
        let mut snap = computer.to_dict();
        snap.insert("big".into(), json!("a".repeat(3000)));
        computer.load_dict(snap);

        push(&mut computer).await.unwrap();
        computer.load_dict(Snapshot::new());
        pull(&mut computer).await.unwrap();

        assert_eq!(computer.to_dict()["big"].as_str().map(str::len), Some(3000));
        assert_eq!(computer.flags().max_output, 100);
    }

    #[test]
    fn parse_rejects_non_objects() {
        assert!(matches!(parse_snapshot("[1, 2]"), Err(Error::Sync(_))));
        assert!(matches!(parse_snapshot("nope"), Err(Error::Serialization(_))));
    }
}
