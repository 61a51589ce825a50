//! Repair configuration merging.
//!
//! Applies case-specific and command-line overrides to the base config.

use anyhow::Result;
use repair::io::config::RepairConfig;

use crate::case::CaseConfig;

/// Apply overrides to the base config. The command line wins over the case.
pub fn apply_case_config(
    mut base: RepairConfig,
    overrides: &CaseConfig,
    cli_max_iterations: Option<u32>,
) -> Result<RepairConfig> {
    if let Some(max_iterations) = overrides.max_iterations {
        base.max_iterations = max_iterations;
    }
    if let Some(max_iterations) = cli_max_iterations {
        base.max_iterations = max_iterations;
    }
    base.validate()?;
    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_base_without_overrides() {
        let base = RepairConfig::default();
        let merged =
            apply_case_config(base.clone(), &CaseConfig::default(), None).expect("merge");
        assert_eq!(merged.max_iterations, base.max_iterations);
    }

    #[test]
    fn case_override_applies() {
        let overrides = CaseConfig {
            max_iterations: Some(3),
        };
        let merged = apply_case_config(RepairConfig::default(), &overrides, None).expect("merge");
        assert_eq!(merged.max_iterations, 3);
    }

    #[test]
    fn command_line_beats_case() {
        let overrides = CaseConfig {
            max_iterations: Some(3),
        };
        let merged =
            apply_case_config(RepairConfig::default(), &overrides, Some(5)).expect("merge");
        assert_eq!(merged.max_iterations, 5);
    }

    #[test]
    fn zero_iterations_rejected() {
        let err = apply_case_config(RepairConfig::default(), &CaseConfig::default(), Some(0))
            .expect_err("invalid");
        assert!(err.to_string().contains("max_iterations"));
    }
}
