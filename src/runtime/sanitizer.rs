//! Sanitizer environment rewriting: point symbolizer and suppression options at local resources.

use std::collections::BTreeMap;

use crate::{ReproError, ReproResult, Resources};

pub const EXTERNAL_SYMBOLIZER_KEY: &str = "external_symbolizer_path";
pub const SUPPRESSIONS_KEY: &str = "suppressions";
pub const DEFAULT_DISPLAY: &str = ":0.0";

/// Ordered `key=value` pairs of a `*_OPTIONS` variable.
pub type SanitizerOptions = Vec<(String, String)>;

/// Parses `a=1:b=2`. Empty segments (e.g. a trailing `:`) are skipped.
pub fn parse_sanitizer_options(variable: &str, value: &str) -> ReproResult<SanitizerOptions> {
    let mut out = Vec::new();
    for segment in value.split(':') {
        if segment.is_empty() {
            continue;
        }
        let mut parts = segment.split('=');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(k), Some(v), None) if !k.is_empty() => out.push((k.to_string(), v.to_string())),
            _ => {
                return Err(ReproError::MalformedOptions {
                    variable: variable.to_string(),
                    segment: segment.to_string(),
                })
            }
        }
    }
    Ok(out)
}

pub fn serialize_sanitizer_options(options: &SanitizerOptions) -> String {
    options
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn set_option(options: &mut SanitizerOptions, key: &str, value: String) {
    if let Some(slot) = options.iter_mut().find(|(k, _)| k == key) {
        slot.1 = value;
    }
}

/// Rewrites `env` in place: sets `<SANITIZER>_SYMBOLIZER_PATH` and `DISPLAY`, and in every
/// `*_OPTIONS` variable redirects `external_symbolizer_path` and `suppressions` (only when present)
/// to the local resources. Running it twice gives the same result.
pub fn rewrite_sanitizer_env(
    env: &mut BTreeMap<String, String>,
    sanitizer: &str,
    resources: &Resources,
) -> ReproResult<()> {
    let symbolizer = resources.symbolizer().display().to_string();
    env.insert(
        format!("{}_SYMBOLIZER_PATH", sanitizer.to_ascii_uppercase()),
        symbolizer.clone(),
    );
    env.insert("DISPLAY".to_string(), DEFAULT_DISPLAY.to_string());

    let variables: Vec<String> = env.keys().filter(|k| k.contains("_OPTIONS")).cloned().collect();
    for variable in variables {
        let mut options = parse_sanitizer_options(&variable, &env[&variable])?;
        set_option(&mut options, EXTERNAL_SYMBOLIZER_KEY, symbolizer.clone());
        if options.iter().any(|(k, _)| k == SUPPRESSIONS_KEY) {
            let path = resources.suppressions_for(&variable)?;
            set_option(&mut options, SUPPRESSIONS_KEY, path.display().to_string());
        }
        env.insert(variable, serialize_sanitizer_options(&options));
    }
    Ok(())
}
