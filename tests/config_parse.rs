use gesture_retrain::config::{Config, PairScope, ThresholdBoundary};

#[test]
fn parse_example_config() {
    let raw = include_str!("../gesture-retrain.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert!(cfg.queue.workers >= 1);
    assert!(!cfg.paths.models_dir.is_empty());
    assert_eq!(cfg.contamination.threshold_percent, 10.0);
    assert_eq!(cfg.contamination.boundary, ThresholdBoundary::Strict);
    assert_eq!(cfg.contamination.scope, PairScope::CrossProduct);
    assert_eq!(cfg.training.env.get("TF_CPP_MIN_LOG_LEVEL").map(String::as_str), Some("2"));
}

#[test]
fn missing_sections_fall_back_to_defaults() {
    let cfg: Config = toml::from_str("[contamination]\nthreshold_percent = 5.0\ntolerance = 0.001\nboundary = \"inclusive\"\nscope = \"same_label\"\n")
        .expect("parse TOML");
    assert_eq!(cfg.contamination.boundary, ThresholdBoundary::Inclusive);
    assert_eq!(cfg.contamination.scope, PairScope::SameLabel);
    assert_eq!(cfg.queue.capacity, 32);
    assert_eq!(cfg.output.report_filename, "report.json");
}

#[test]
fn example_security_patterns_compile() {
    let raw = include_str!("../gesture-retrain.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    let label = regex::Regex::new(&cfg.security.label_pattern).expect("label pattern");
    assert!(label.is_match("thumbs up"));
    assert!(!label.is_match("a,b"));
    let code = regex::Regex::new(&cfg.security.model_code_pattern).expect("code pattern");
    assert!(code.is_match("1718000000_ab12cd34"));
    assert!(!code.is_match("../escape"));
}

#[test]
fn gate_disabling_values_are_rejected() {
    let mut cfg = Config::default();
    assert!(cfg.validate().is_ok());

    for tol in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        cfg.contamination.tolerance = tol;
        assert!(cfg.validate().is_err(), "tolerance {tol} accepted");
    }
    cfg.contamination.tolerance = 1e-7;

    for threshold in [f64::NAN, -0.5, 100.5] {
        cfg.contamination.threshold_percent = threshold;
        assert!(cfg.validate().is_err(), "threshold {threshold} accepted");
    }
    cfg.contamination.threshold_percent = 100.0;
    assert!(cfg.validate().is_ok());
}

#[test]
fn load_refuses_negative_tolerance() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(
        &path,
        "[contamination]\nthreshold_percent = 10.0\ntolerance = -1.0\nboundary = \"strict\"\nscope = \"cross_product\"\n",
    )
    .unwrap();
    let err = Config::load(&path).unwrap_err();
    assert!(format!("{err:#}").contains("tolerance"));
}
