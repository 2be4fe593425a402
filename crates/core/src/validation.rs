//! Checks applied to scripts before they are enqueued.

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

/// Longest accepted script, in characters, after trimming.
pub const MAX_SCRIPT_CHARS: usize = 10_000;

/// Patterns a script may not contain (matched case-insensitively).
pub const DENYLIST: [&str; 7] = [
    "os.execute",
    "io.popen",
    "loadfile",
    "dofile",
    "require.*os",
    "require.*io",
    "package.loadlib",
];

static DENYLIST_REGEXES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    DENYLIST
        .iter()
        .map(|pattern| {
            let regex = Regex::new(&format!("(?i){}", pattern))
                .expect("denylist patterns are valid regexes");
            (*pattern, regex)
        })
        .collect()
});

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptValidationError {
    #[error("Script is required")]
    Empty,

    #[error("Script is too long (max {max} characters)")]
    TooLong { max: usize },

    #[error("Dangerous command detected: {0}")]
    Dangerous(&'static str),

    #[error("Script must contain a function main(splash, args)")]
    MissingMain,

    #[error("args must be a JSON object")]
    ArgsNotObject,
}

/// Trim and check a submitted script. Returns the trimmed script.
pub fn validate_script(script: &str) -> Result<&str, ScriptValidationError> {
    let script = script.trim();

    if script.is_empty() {
        return Err(ScriptValidationError::Empty);
    }

    if script.chars().count() > MAX_SCRIPT_CHARS {
        return Err(ScriptValidationError::TooLong {
            max: MAX_SCRIPT_CHARS,
        });
    }

    if let Some((pattern, _)) = DENYLIST_REGEXES
        .iter()
        .find(|(_, regex)| regex.is_match(script))
    {
        return Err(ScriptValidationError::Dangerous(*pattern));
    }

    if !script.contains("function main") {
        return Err(ScriptValidationError::MissingMain);
    }

    Ok(script)
}

/// Accept a missing or null `args` as empty; anything but an object is rejected.
pub fn validate_args(args: Option<Value>) -> Result<Map<String, Value>, ScriptValidationError> {
    match args {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(ScriptValidationError::ArgsNotObject),
    }
}
