use semver::{BuildMetadata, Version};

use crate::manifest::UpdateManifest;

/// Version identifiers of the running installation, resolved once per operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnvironment {
    pub app_version: String,
    pub runtime_version: Option<String>,
    pub framework_version: Option<String>,
}

impl HostEnvironment {
    pub fn new(app_version: impl Into<String>) -> Self {
        Self {
            app_version: app_version.into(),
            runtime_version: None,
            framework_version: None,
        }
    }

    pub fn with_runtime_version(mut self, version: impl Into<String>) -> Self {
        self.runtime_version = Some(version.into());
        self
    }

    pub fn with_framework_version(mut self, version: impl Into<String>) -> Self {
        self.framework_version = Some(version.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compatibility {
    Compatible,
    Incompatible(String),
}

/// Runtime, then framework, then minimum application version; the first failure wins.
pub fn check_version_compatibility(
    manifest: &UpdateManifest,
    host: &HostEnvironment,
) -> Compatibility {
    let checks = [
        (
            "Runtime",
            manifest.required_runtime_version.as_deref(),
            host.runtime_version.as_deref(),
        ),
        (
            "Framework",
            manifest.required_framework_version.as_deref(),
            host.framework_version.as_deref(),
        ),
        (
            "Application",
            manifest.minimum_required_version.as_deref(),
            Some(host.app_version.as_str()),
        ),
    ];

    for (label, required, current) in checks {
        let Some(required) = required.filter(|value| !value.trim().is_empty()) else {
            continue;
        };
        if let Err(reason) = check_requirement(label, required, current) {
            return Compatibility::Incompatible(reason);
        }
    }

    Compatibility::Compatible
}

fn check_requirement(label: &str, required: &str, current: Option<&str>) -> Result<(), String> {
    let required_version = parse_lenient_version(required)
        .ok_or_else(|| format!("{label} version requirement '{required}' is not a valid version"))?;
    let Some(current) = current else {
        return Err(format!(
            "{label} version {required} required, but current version is unknown"
        ));
    };
    let current_version = parse_lenient_version(current)
        .ok_or_else(|| format!("{label} version {required} required, but current version '{current}' is not a valid version"))?;

    if current_version >= required_version {
        Ok(())
    } else {
        Err(format!(
            "{label} version {required} required, but current version is {current}"
        ))
    }
}

/// Parses `1`, `1.2`, `v1.2.3` and `1.2.3-rc.1+build` style strings; build metadata is
/// dropped so it never affects ordering.
pub fn parse_lenient_version(input: &str) -> Option<Version> {
    let trimmed = input.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    let without_build = trimmed.split('+').next().unwrap_or(trimmed);
    let (core, pre) = match without_build.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (without_build, None),
    };

    let parts = core.split('.').collect::<Vec<_>>();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    let mut numbers = [0_u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        *slot = part.parse().ok()?;
    }

    let mut canonical = format!("{}.{}.{}", numbers[0], numbers[1], numbers[2]);
    if let Some(pre) = pre {
        canonical.push('-');
        canonical.push_str(pre);
    }

    let mut version = Version::parse(&canonical).ok()?;
    version.build = BuildMetadata::EMPTY;
    Some(version)
}
