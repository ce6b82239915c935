use mesh_adapt_bridge::adapt::config::{AdaptConfig, SizeSource, SizingMode};

#[test]
fn default_config_survives_json() {
    let cfg = AdaptConfig::default();
    let text = serde_json::to_string(&cfg).unwrap();
    let back: AdaptConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(back, cfg);
}

#[test]
fn partial_json_fills_defaults() {
    let cfg: AdaptConfig = serde_json::from_str(r#"{ "hmax": 0.5, "sizing": "anisotropic" }"#).unwrap();
    assert_eq!(cfg.hmax, 0.5);
    assert_eq!(cfg.sizing, SizingMode::Anisotropic);
    assert_eq!(cfg.hmin, AdaptConfig::default().hmin);
    assert_eq!(cfg.size_source, SizeSource::default());
    assert!(cfg.validate().is_ok());
}

#[test]
fn size_source_is_tagged_by_kind() {
    let cfg: AdaptConfig = serde_json::from_str(
        r#"{ "size_source": { "kind": "indicator", "field": "error", "component": 2 } }"#,
    )
    .unwrap();
    assert_eq!(
        cfg.size_source,
        SizeSource::Indicator {
            field: "error".into(),
            component: 2
        }
    );
    assert_eq!(cfg.size_source.field(), "error");
    assert_eq!(cfg.size_source.component(), 2);
}

#[test]
fn loaded_bounds_are_still_validated() {
    let cfg: AdaptConfig = serde_json::from_str(r#"{ "hmin": 1.0, "hmax": 0.1 }"#).unwrap();
    assert!(cfg.validate().is_err());
    let cfg: AdaptConfig = serde_json::from_str(
        r#"{ "size_source": { "kind": "gradient", "field": "", "component": 0 } }"#,
    )
    .unwrap();
    assert!(cfg.validate().is_err());
}
