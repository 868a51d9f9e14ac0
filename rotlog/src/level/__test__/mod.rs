#[cfg(test)]
mod __test__ {
  use std::str::FromStr;

  use crate::level::Level;

  #[test]
  fn levels_are_totally_ordered() {
    for pair in Level::ALL.windows(2) {
      assert!(pair[0] < pair[1], "{} should be below {}", pair[0], pair[1]);
    }
    assert!(Level::Critical > Level::Trace);
  }

  #[test]
  fn names_match_log_output() {
    let names: Vec<&str> = Level::ALL.iter().map(|l| l.as_str()).collect();
    assert_eq!(names, ["TRACE", "DEBUG", "INFO", "WARN", "ERROR", "CRITICAL"]);
    assert_eq!(Level::Warning.to_string(), "WARN");
  }

  #[test]
  fn plain_prefix_layout() {
    assert_eq!(Level::Info.prefix(false), " level=\"INFO\" ");
    assert_eq!(Level::Critical.prefix(false), " level=\"CRITICAL\" ");
  }

  #[test]
  fn colored_prefix_wraps_name_in_ansi() {
    assert_eq!(Level::Info.prefix(true), " level=\"\x1b[34mINFO\x1b[0m\" ");
    assert_eq!(Level::Error.prefix(true), " level=\"\x1b[31mERROR\x1b[0m\" ");
    for level in Level::ALL {
      assert!(level.prefix(true).contains(level.as_str()));
      assert_ne!(level.prefix(true), level.prefix(false));
    }
  }

  #[test]
  fn parse_is_case_insensitive() {
    assert_eq!(Level::from_str("info").unwrap(), Level::Info);
    assert_eq!(Level::from_str(" Warning ").unwrap(), Level::Warning);
    assert_eq!(Level::from_str("WARN").unwrap(), Level::Warning);
    assert!(Level::from_str("verbose").is_err());
  }

  #[test]
  fn u8_round_trip_saturates_at_critical() {
    for level in Level::ALL {
      assert_eq!(Level::from_u8(level as u8), level);
    }
    assert_eq!(Level::from_u8(42), Level::Critical);
  }

  #[test]
  fn serde_uses_uppercase_names() {
    let json = serde_json::to_string(&Level::Warning).unwrap();
    assert_eq!(json, "\"WARN\"");

    let parsed: Level = serde_json::from_str("\"WARNING\"").unwrap();
    assert_eq!(parsed, Level::Warning);
  }

  #[test]
  fn tracing_levels_map_onto_rotlog_levels() {
    assert_eq!(Level::from(&tracing::Level::TRACE), Level::Trace);
    assert_eq!(Level::from(&tracing::Level::WARN), Level::Warning);
    assert_eq!(Level::from(&tracing::Level::ERROR), Level::Error);
  }
}
