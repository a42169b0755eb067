//! Rewrites imports of the injected `computer` object.
//!
//! The runtime hands python code a ready `computer` object. Code that
//! imports it anyway would shadow it with the real module, so each import
//! form is rewritten into a reference to the existing object.

use regex_lite::{Captures, Regex};

const SCREEN_CAPTURE_CALLS: [&str; 4] = [
    "computer.display.view",
    "computer.display.screenshot",
    "computer.view",
    "computer.screenshot",
];

/// Rewrite `computer` imports in a python block.
pub fn rewrite_computer_imports(code: &str) -> String {
    let mut code = code.replace("import computer\n", "pass\n");

    if let Ok(re) = Regex::new(r"import computer\.(\w+) as (\w+)") {
        code = re.replace_all(&code, "$2 = computer.$1").into_owned();
    }

    if let Ok(re) = Regex::new(r"from computer import (.+)") {
        code = re
            .replace_all(&code, |caps: &Captures| {
                caps[1]
                    .split(", ")
                    .map(|name| format!("{0} = computer.{0}", name.trim()))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .into_owned();
    }

    if let Ok(re) = Regex::new(r"import computer\.\w+\n") {
        code = re.replace_all(&code, "pass\n").into_owned();
    }

    // A trailing capture call would display its result twice
    let last_line = code.trim().rsplit('\n').next().unwrap_or_default();
    if SCREEN_CAPTURE_CALLS.iter().any(|call| last_line.starts_with(call)) {
        code.push_str("\npass");
    }

    code
}
