use anyhow::Result;
use std::path::Path;

use crate::cli::config::{Config, Overrides};
use crate::engine::plan::RunPlan;

/// Check a run configuration without generating any load.
/// Checks for:
/// - YAML/JSON syntax and schema
/// - Stage, duration and threshold validity
/// - Thresholds naming metrics the scenario records
pub fn run_validate(config_path: &Path, overrides: &Overrides) -> Result<RunPlan> {
    println!("Validating {}...", config_path.display());

    let mut config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("  ✗ Config file invalid: {}", e);
            return Err(e.into());
        }
    };
    println!("  ✓ Config file parsed");

    config.apply_overrides(overrides);
    let plan = match config.resolve() {
        Ok(plan) => plan,
        Err(e) => {
            println!("  ✗ Validation failed: {}", e);
            return Err(e.into());
        }
    };

    println!("  ✓ Configuration valid");
    println!("    scenario: {}", plan.scenario.name());
    println!("    base_url: {}", plan.base_url);
    println!(
        "    stages: {} stage(s), {:?} total, peak {} VUs",
        plan.schedule.stages().len(),
        plan.schedule.total_duration(),
        plan.schedule.max_target()
    );
    println!(
        "    think time: {:?} - {:?}",
        plan.think_time.min, plan.think_time.max
    );
    for spec in &plan.thresholds {
        println!("    threshold: {}: {}", spec.metric, spec.expression);
    }
    if let Some(path) = &plan.hooks.health_check {
        println!("    health check: {}", path);
    }
    if let Some(probe) = &plan.hooks.inventory {
        println!("    inventory: {} ({})", probe.path, probe.field);
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const VALID_CONFIG: &str = r#"
base_url: http://localhost:8080
scenario:
  kind: coupon-issue
  coupon_id: 7
stages:
  - duration: 10s
    target: 5
thresholds:
  errors: ["rate<0.10"]
"#;

    #[test]
    fn test_validate_valid_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("valid.yaml");
        fs::write(&path, VALID_CONFIG).unwrap();

        let plan = run_validate(&path, &Overrides::default()).unwrap();
        assert_eq!(plan.schedule.max_target(), 5);
        assert_eq!(plan.thresholds.len(), 1);
    }

    #[test]
    fn test_validate_missing_file() {
        let result = run_validate(Path::new("/nonexistent/run.yaml"), &Overrides::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_with_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "invalid: [yaml: content").unwrap();

        assert!(run_validate(&path, &Overrides::default()).is_err());
    }

    #[test]
    fn test_validate_base_url_from_overrides() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "scenario: { kind: popular-products }\n").unwrap();

        assert!(run_validate(&path, &Overrides::default()).is_err());
        let overrides = Overrides {
            base_url: Some("http://localhost:9000".to_string()),
            coupon_id: None,
        };
        let plan = run_validate(&path, &overrides).unwrap();
        assert_eq!(plan.base_url, "http://localhost:9000");
    }
}
