//! Job-name wire formats.
//!
//! Three conventions share the registry key space:
//! - `pkg:builder` names a builder job,
//! - `{project:target[:configuration]}` names a target job (braces are literal),
//! - `pkg#export` names a job exported by a module (`default` when omitted).

use std::sync::LazyLock;

use regex::Regex;

use crate::core::target::{target_string_from_target, Target};

static BUILDER_JOB_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^:{][^:]*):([^:]+)$").unwrap());

static TARGET_JOB_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{([^:]+):([^:]+)(?::([^:]*))?\}$").unwrap());

static SCHEDULABLE_BUILDER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^:]+:[^:]+(:[^:]+)?$").unwrap());

/// Export name used when a module job name has no `#export` part.
pub const DEFAULT_EXPORT: &str = "default";

/// Build the target job name `{project:target[:configuration]}`.
pub fn target_job_name(target: &Target) -> String {
    format!("{{{}}}", target_string_from_target(target))
}

/// Parse a target job name back into a target.
pub fn parse_target_job_name(name: &str) -> Option<Target> {
    let caps = TARGET_JOB_NAME.captures(name)?;
    Some(Target {
        project: caps[1].to_string(),
        target: caps[2].to_string(),
        configuration: caps.get(3).map(|m| m.as_str().to_string()),
    })
}

/// Check whether `name` is a `pkg:builder` job name.
pub fn is_builder_job_name(name: &str) -> bool {
    BUILDER_JOB_NAME.is_match(name)
}

/// Check whether `name` is acceptable to `Architect::schedule_builder`.
pub fn is_schedulable_builder_name(name: &str) -> bool {
    SCHEDULABLE_BUILDER_NAME.is_match(name)
}

/// Split a `pkg#export` module job name.
pub fn parse_module_job_name(name: &str) -> Option<(&str, &str)> {
    let (package, export) = match name.split_once('#') {
        Some((package, export)) => (package, export),
        None => (name, DEFAULT_EXPORT),
    };
    if package.is_empty() || export.is_empty() {
        return None;
    }
    Some((package, export))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_job_name_format() {
        let target = Target::new("app", "build").with_configuration("prod");
        assert_eq!(target_job_name(&target), "{app:build:prod}");
        assert_eq!(target_job_name(&Target::new("app", "build")), "{app:build}");
    }

    #[test]
    fn test_parse_target_job_name() {
        let target = parse_target_job_name("{app:build:prod}").unwrap();
        assert_eq!(target, Target::new("app", "build").with_configuration("prod"));

        let target = parse_target_job_name("{app:build}").unwrap();
        assert!(target.configuration.is_none());

        let target = parse_target_job_name("{app:build:}").unwrap();
        assert_eq!(target.configuration.as_deref(), Some(""));

        assert!(parse_target_job_name("app:build").is_none());
        assert!(parse_target_job_name("{app}").is_none());
    }

    #[test]
    fn test_builder_job_name() {
        assert!(is_builder_job_name("pkg:builder"));
        assert!(!is_builder_job_name("pkg:builder:extra"));
        assert!(!is_builder_job_name("{app:build}x"));
        assert!(!is_builder_job_name("{app:build}"));
        assert!(!is_builder_job_name("pkg"));
    }

    #[test]
    fn test_schedulable_builder_name() {
        assert!(is_schedulable_builder_name("pkg:builder"));
        assert!(is_schedulable_builder_name("project:target:configuration"));
        assert!(!is_schedulable_builder_name("pkg"));
        assert!(!is_schedulable_builder_name("a:b:"));
    }

    #[test]
    fn test_module_job_name() {
        assert_eq!(parse_module_job_name("pkg#run"), Some(("pkg", "run")));
        assert_eq!(parse_module_job_name("pkg"), Some(("pkg", "default")));
        assert_eq!(parse_module_job_name("#run"), None);
        assert_eq!(parse_module_job_name("pkg#"), None);
    }
}
