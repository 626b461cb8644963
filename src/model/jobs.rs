//! Job type definitions: which reproducer flavor, sanitizer and binary apply to a job.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use crate::{ReproError, ReproResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReproducerKind {
    Base,
    Libfuzzer,
    Gui,
}

impl clap::ValueEnum for ReproducerKind {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Base, Self::Libfuzzer, Self::Gui]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Base => clap::builder::PossibleValue::new("base"),
            Self::Libfuzzer => clap::builder::PossibleValue::new("libfuzzer"),
            Self::Gui => clap::builder::PossibleValue::new("gui"),
        })
    }
}

/// One `[jobs.<name>]` or `[presets.<name>]` table. Every key is optional so presets can be layered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JobDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reproducer: Option<ReproducerKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sanitizer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedJob {
    pub job_type: String,
    pub reproducer: ReproducerKind,
    pub sanitizer: String,
    pub binary: Option<String>,
}

/// Flattens the preset chain of `def`; keys set closer to the job win.
pub fn flatten_definition(
    def: &JobDefinition,
    presets: &BTreeMap<String, JobDefinition>,
) -> ReproResult<JobDefinition> {
    let mut chain = vec![def.clone()];
    let mut seen = Vec::new();
    let mut next = def.preset.clone();
    while let Some(name) = next {
        if seen.contains(&name) {
            return Err(ReproError::Config(format!("preset cycle through {name:?}")));
        }
        let preset = presets
            .get(&name)
            .ok_or_else(|| ReproError::Config(format!("unknown preset {name:?}")))?;
        seen.push(name);
        next = preset.preset.clone();
        chain.push(preset.clone());
    }

    let mut out = JobDefinition::default();
    for layer in chain.into_iter().rev() {
        if layer.reproducer.is_some() {
            out.reproducer = layer.reproducer;
        }
        if layer.sanitizer.is_some() {
            out.sanitizer = layer.sanitizer;
        }
        if layer.binary.is_some() {
            out.binary = layer.binary;
        }
    }
    Ok(out)
}

/// Resolves a job type against the configured tables, letting CLI overrides fill or replace keys.
pub fn resolve_job(
    job_type: &str,
    jobs: &BTreeMap<String, JobDefinition>,
    presets: &BTreeMap<String, JobDefinition>,
    reproducer_override: Option<ReproducerKind>,
    sanitizer_override: Option<&str>,
) -> ReproResult<ResolvedJob> {
    let flat = match jobs.get(job_type) {
        Some(def) => flatten_definition(def, presets)?,
        None if reproducer_override.is_some() && sanitizer_override.is_some() => JobDefinition::default(),
        None => return Err(ReproError::JobTypeNotSupported(job_type.to_string())),
    };

    let reproducer = reproducer_override
        .or(flat.reproducer)
        .ok_or_else(|| ReproError::Config(format!("job {job_type} has no reproducer")))?;
    let sanitizer = sanitizer_override
        .map(str::to_string)
        .or(flat.sanitizer)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ReproError::SanitizerNotProvided {
            job_type: job_type.to_string(),
        })?;

    Ok(ResolvedJob {
        job_type: job_type.to_string(),
        reproducer,
        sanitizer: sanitizer.to_ascii_uppercase(),
        binary: flat.binary,
    })
}
