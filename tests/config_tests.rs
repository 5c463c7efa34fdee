//! Configuration loading and session-option mapping.

use std::io::Write;

use spiral::runtime::Discipline;
use spiral::Config;

#[test]
fn from_file_overrides_defaults() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        "[engine]\nmax_steps = 777\nscheduler = \"depth-first\"\ndetect_races = true\n\n[logging]\nlevel = \"debug\"\n"
    )
    .expect("write config");

    let config =
        Config::from_file(file.path().to_str().expect("utf8 path")).expect("config parses");
    assert_eq!(config.engine.max_steps, 777);
    assert_eq!(config.engine.scheduler, Discipline::DepthFirst);
    assert!(config.engine.detect_races);
    assert_eq!(config.logging.level, "debug");
    // Untouched keys keep their defaults
    assert_eq!(config.engine.yield_interval, 64);
}

#[test]
fn missing_file_yields_defaults() {
    let config = Config::from_file("/nonexistent/spiral.toml").expect("figment tolerates");
    assert_eq!(config.engine.max_steps, 100_000);
    assert_eq!(config.engine.scheduler, Discipline::Eager);
}

#[test]
fn session_options_reflect_config() {
    let mut config = Config::default();
    config.engine.max_scheduler_steps = 5_000;
    config.engine.scheduler = Discipline::BreadthFirst;
    let opts = config.session_options(false);
    assert_eq!(opts.max_scheduler_steps, 5_000);
    assert_eq!(opts.discipline, Discipline::BreadthFirst);
    assert!(!opts.eval.trace);
}
