//! Environment and version metadata for `crashrepro env` / `crashrepro version`.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use crate::{find_in_path, Config, SUPPRESSIONS_DIR, SYMBOLIZER_FILE, SYMBOLIZE_PROXY_FILE, WINDOW_MANAGER};

/// Host tools GUI reproduction shells out to.
pub const HOST_TOOLS: &[&str] = &["Xvfb", WINDOW_MANAGER, "x11vnc", "vncviewer", "xdotool"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvInfo {
    pub os: String,
    pub arch: String,
    pub crashrepro: VersionInfo,
    pub tools: BTreeMap<String, ToolInfo>,
    pub resources: BTreeMap<String, ToolInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_date: Option<String>,
}

pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: option_env!("CRASHREPRO_COMMIT").map(|s| s.to_string()),
        build_date: option_env!("CRASHREPRO_BUILD_DATE").map(|s| s.to_string()),
    }
}

pub fn env_info(config: &Config) -> EnvInfo {
    let tools = HOST_TOOLS
        .iter()
        .map(|tool| {
            let path = find_in_path(tool);
            (
                tool.to_string(),
                ToolInfo {
                    found: path.is_some(),
                    path: path.map(|p| p.display().to_string()),
                },
            )
        })
        .collect();

    let root = config.resources_dir();
    let resources = [SYMBOLIZER_FILE, SYMBOLIZE_PROXY_FILE, SUPPRESSIONS_DIR]
        .into_iter()
        .map(|name| {
            let path = root.join(name);
            (
                name.to_string(),
                ToolInfo {
                    found: path.exists(),
                    path: Some(path.display().to_string()),
                },
            )
        })
        .collect();

    EnvInfo {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        crashrepro: version_info(),
        tools,
        resources,
    }
}

impl EnvInfo {
    pub fn pretty(&self) -> String {
        let mut out = format!("crashrepro {} ({}/{})\n", self.crashrepro.version, self.os, self.arch);
        for (section, entries) in [("tools", &self.tools), ("resources", &self.resources)] {
            out.push_str(&format!("{section}:\n"));
            for (name, info) in entries {
                let state = if info.found { "ok" } else { "missing" };
                match &info.path {
                    Some(p) => out.push_str(&format!("  {name}: {state} ({p})\n")),
                    None => out.push_str(&format!("  {name}: {state}\n")),
                }
            }
        }
        out.trim_end().to_string()
    }
}
