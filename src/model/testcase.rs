//! Locally cached testcase metadata, as returned by the fuzzing service's testcase detail.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::{unescape_html, ReproError, ReproResult};

pub const TESTCASE_METADATA_FILE: &str = "testcase.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacktraceLine {
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrashStacktrace {
    #[serde(default)]
    pub lines: Vec<StacktraceLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestcaseFields {
    pub job_type: String,
    #[serde(default)]
    pub absolute_path: String,
    #[serde(default)]
    pub one_time_crasher_flag: bool,
    #[serde(default)]
    pub gestures: Option<Vec<String>>,
    #[serde(default)]
    pub window_argument: String,
    #[serde(default)]
    pub minimized_arguments: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestcaseMetadata {
    #[serde(default)]
    pub build_url: Option<String>,
    #[serde(default)]
    pub gn_args: Option<String>,
}

/// Raw testcase detail document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestcaseDetail {
    pub id: serde_json::Value,
    #[serde(default)]
    pub crash_stacktrace: CrashStacktrace,
    #[serde(default)]
    pub crash_type: String,
    #[serde(default)]
    pub crash_state: String,
    #[serde(default)]
    pub crash_revision: Option<serde_json::Value>,
    pub testcase: TestcaseFields,
    #[serde(default)]
    pub metadata: TestcaseMetadata,
}

/// Testcase with the reproduction environment and arguments recovered from its stacktrace.
#[derive(Debug, Clone)]
pub struct Testcase {
    pub id: String,
    pub job_type: String,
    pub stacktrace_lines: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub reproduction_args: String,
    pub absolute_path: String,
    pub file_extension: String,
    pub reproducible: bool,
    pub gestures: Vec<String>,
    pub revision: Option<String>,
    pub build_url: Option<String>,
    pub gn_args: Option<String>,
}

impl Testcase {
    pub fn from_detail(detail: TestcaseDetail) -> Self {
        let stacktrace_lines: Vec<String> = detail
            .crash_stacktrace
            .lines
            .into_iter()
            .map(|l| l.content)
            .collect();
        let (environment, mut reproduction_args) = environment_and_args(&stacktrace_lines);
        if reproduction_args.is_empty() {
            reproduction_args = format!(
                "{} {}",
                detail.testcase.window_argument, detail.testcase.minimized_arguments
            )
            .trim()
            .to_string();
        }

        Self {
            id: json_scalar(&detail.id),
            job_type: detail.testcase.job_type,
            stacktrace_lines,
            environment,
            reproduction_args,
            file_extension: file_extension(&detail.testcase.absolute_path),
            absolute_path: detail.testcase.absolute_path,
            reproducible: !detail.testcase.one_time_crasher_flag,
            gestures: detail.testcase.gestures.unwrap_or_default(),
            revision: detail.crash_revision.as_ref().map(json_scalar),
            build_url: detail.metadata.build_url,
            gn_args: detail.metadata.gn_args.map(|s| s.trim_end_matches('\n').to_string()),
        }
    }

    pub fn load(dir: &Path) -> ReproResult<Self> {
        let path = dir.join(TESTCASE_METADATA_FILE);
        let bytes = std::fs::read(&path)
            .map_err(|e| ReproError::Testcase(format!("failed to read {}: {e}", path.display())))?;
        let detail: TestcaseDetail = serde_json::from_slice(&bytes)
            .map_err(|e| ReproError::Testcase(format!("invalid testcase detail {}: {e}", path.display())))?;
        Ok(Self::from_detail(detail))
    }

    /// Finds the input file inside the testcase directory.
    pub fn input_path(&self, dir: &Path) -> ReproResult<PathBuf> {
        let canonical = dir.join(format!("testcase{}", self.file_extension));
        if canonical.is_file() {
            return Ok(canonical);
        }
        if let Some(name) = Path::new(&self.absolute_path).file_name() {
            let original = dir.join(name);
            if original.is_file() {
                return Ok(original);
            }
        }
        Err(ReproError::Testcase(format!(
            "no testcase input found in {} (expected {})",
            dir.display(),
            canonical.display()
        )))
    }

    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.reproducible {
            out.push(
                "the testcase is marked as unreproducible; it might not reproduce correctly here".to_string(),
            );
        }
        if !self.gestures.is_empty() {
            out.push("the testcase uses gestures and is not guaranteed to reproduce correctly".to_string());
        }
        out
    }
}

fn json_scalar(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `.js` for `/a/b/c.js`, empty when the name has no dot.
pub fn file_extension(absolute_path: &str) -> String {
    match absolute_path.rsplit_once('.') {
        Some((_, ext)) if !ext.contains('/') => format!(".{ext}"),
        _ => String::new(),
    }
}

const ENV_MARKER: &str = "[Environment] ";
const COMMAND_MARKER: &str = "Running command: ";

/// Pulls `[Environment] NAME = value` lines and the recorded command line out of a stacktrace.
pub fn environment_and_args<S: AsRef<str>>(lines: &[S]) -> (BTreeMap<String, String>, String) {
    let mut env = BTreeMap::new();
    let mut args = String::new();
    for raw in lines {
        let line = unescape_html(raw.as_ref());
        if let Some(idx) = line.find(ENV_MARKER) {
            let rest = &line[idx + ENV_MARKER.len()..];
            let Some((name, value)) = rest.split_once(" = ") else {
                tracing::debug!("ignoring malformed environment line {line:?}");
                continue;
            };
            let name = name.trim().to_string();
            let mut value = value.to_string();
            if name.contains("_OPTIONS") {
                value = value.replace("symbolize=0", "symbolize=1");
                if !value.contains("symbolize=1") {
                    value.push_str(":symbolize=1");
                }
            }
            env.insert(name, value);
        } else if let Some(idx) = line.find(COMMAND_MARKER) {
            let tokens: Vec<&str> = line[idx + COMMAND_MARKER.len()..].split(' ').collect();
            // Drop the binary and the testcase path.
            args = if tokens.len() > 2 {
                tokens[1..tokens.len() - 1].join(" ")
            } else {
                String::new()
            };
        }
    }
    (env, args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail_json() -> serde_json::Value {
        serde_json::json!({
            "id": 1234,
            "crash_type": "Heap-buffer-overflow",
            "crash_state": "foo\nbar",
            "crash_revision": 450000,
            "crash_stacktrace": {"lines": [
                {"content": "[Environment] ASAN_OPTIONS = alloc_dealloc_mismatch=0:symbolize=0"},
                {"content": "[Environment] UBSAN_OPTIONS = halt_on_error=1"},
                {"content": "[Environment] CHROME_HEADLESS = 1"},
                {"content": "Running command: /mnt/build/d8 --random-seed=1 --turbo /mnt/fuzz/fuzz-1.js"},
                {"content": "==1==ERROR: AddressSanitizer: heap-buffer-overflow"},
            ]},
            "testcase": {
                "job_type": "linux_asan_d8",
                "absolute_path": "/mnt/fuzz/fuzz-1.js",
                "one_time_crasher_flag": true,
                "gestures": ["windowsize,100x100", "Trigger:2"],
                "window_argument": "",
                "minimized_arguments": ""
            },
            "metadata": {"build_url": "gs://builds/d8-450000.zip", "gn_args": "is_asan = true\n"}
        })
    }

    #[test]
    fn derives_environment_and_args() {
        let detail: TestcaseDetail = serde_json::from_value(detail_json()).unwrap();
        let tc = Testcase::from_detail(detail);
        assert_eq!(tc.id, "1234");
        assert_eq!(tc.revision.as_deref(), Some("450000"));
        assert_eq!(tc.reproduction_args, "--random-seed=1 --turbo");
        assert_eq!(tc.environment["ASAN_OPTIONS"], "alloc_dealloc_mismatch=0:symbolize=1");
        assert_eq!(tc.environment["UBSAN_OPTIONS"], "halt_on_error=1:symbolize=1");
        assert_eq!(tc.environment["CHROME_HEADLESS"], "1");
        assert_eq!(tc.file_extension, ".js");
        assert_eq!(tc.gn_args.as_deref(), Some("is_asan = true"));
        assert!(!tc.reproducible);
        assert_eq!(tc.warnings().len(), 2);
    }

    #[test]
    fn falls_back_to_minimized_arguments() {
        let mut json = detail_json();
        json["crash_stacktrace"]["lines"] = serde_json::json!([{"content": "no command here"}]);
        json["testcase"]["window_argument"] = serde_json::json!("--window-size=10,10");
        json["testcase"]["minimized_arguments"] = serde_json::json!("--foo");
        let tc = Testcase::from_detail(serde_json::from_value(json).unwrap());
        assert_eq!(tc.reproduction_args, "--window-size=10,10 --foo");
        assert!(tc.environment.is_empty());
    }

    #[test]
    fn extension_rules() {
        assert_eq!(file_extension("/a/b/c.html"), ".html");
        assert_eq!(file_extension("/a/b.d/c"), "");
        assert_eq!(file_extension("c"), "");
    }

    #[test]
    fn input_path_prefers_canonical_name() {
        let dir = std::env::temp_dir().join(format!("crashrepro-tc-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let tc = Testcase::from_detail(serde_json::from_value(detail_json()).unwrap());
        assert!(tc.input_path(&dir).is_err());

        std::fs::write(dir.join("fuzz-1.js"), "x").unwrap();
        assert_eq!(tc.input_path(&dir).unwrap(), dir.join("fuzz-1.js"));

        std::fs::write(dir.join("testcase.js"), "x").unwrap();
        assert_eq!(tc.input_path(&dir).unwrap(), dir.join("testcase.js"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
