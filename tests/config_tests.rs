use std::io::Write;

use varship::kernel::slot::SlotSpec;
use varship::Config;

#[test]
fn test_load_config_and_points_from_disk() {
    let dir = tempfile::tempdir().unwrap();

    let source = dir.path().join("app.py");
    std::fs::write(&source, "def f(x):\n    y = x * 2\n    return y\n").unwrap();

    let points = dir.path().join("points.txt");
    let mut file = std::fs::File::create(&points).unwrap();
    writeln!(file, "# observation points").unwrap();
    writeln!(file, "{}:2:True:y", source.display()).unwrap();
    writeln!(file, "{}:3:y > 1:y:x", source.display()).unwrap();
    drop(file);

    let config_path = dir.path().join("varship.yaml");
    std::fs::write(
        &config_path,
        format!(
            r#"
name: demo
slots_path: {}
pipeline:
  batch_limit: 5
  workers: 2
broker:
  enabled: false
  failure_budget: 1
file_sink:
  enabled: true
  path: {}
"#,
            points.display(),
            dir.path().join("out.ndjson").display()
        ),
    )
    .unwrap();

    let cfg = Config::load(&config_path).unwrap();
    assert_eq!(cfg.name, "demo");
    assert_eq!(cfg.brokers().unwrap().len(), 2);

    let specs = SlotSpec::load_points(&cfg.slots_path).unwrap();
    assert_eq!(specs.len(), 2);
    // The comment line keeps position 0.
    assert_eq!(specs[0].index, 1);
    assert_eq!(specs[0].condition, None);
    assert_eq!(specs[0].source_line_text.trim(), "y = x * 2");
    assert_eq!(specs[1].index, 2);
    assert_eq!(specs[1].condition.as_deref(), Some("y > 1"));
    assert_eq!(specs[1].primary_expr, "x");
}

#[test]
fn test_missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(&dir.path().join("absent.yaml")).unwrap_err();
    assert!(format!("{err:#}").contains("absent.yaml"));
}
