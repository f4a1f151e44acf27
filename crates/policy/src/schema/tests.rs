//! Deserialization tests for the policy document schema.

use super::*;

#[test]
fn trigger_variants_deserialize() {
    let yaml = r#"
- type: schedule
  spec:
    type: cron
    cron: "*/2 * * * *"
- type: schedule
  spec:
    type: date
    date: "2026-09-01T00:00:00Z"
- type: condition
  expression: "storage.utilization > 85"
- type: on-demand
  api_path: /policies/cleanup/run
- type: event
  source: ais
  geofence:
    center: { lat: 63.43, lon: 10.39 }
    radius_km: 5.0
  window:
    radius_km: 2.0
    dt_seconds: 600
"#;
    let triggers: Vec<Trigger> = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(triggers.len(), 5);
    assert_eq!(triggers[0].kind(), "schedule");
    assert_eq!(triggers[2].kind(), "condition");
    assert_eq!(triggers[3].kind(), "on-demand");
    assert_eq!(triggers[4].kind(), "event");

    match &triggers[4] {
        Trigger::Event { source, geofence, window } => {
            assert_eq!(source, "ais");
            assert!((geofence.radius_km - 5.0).abs() < f64::EPSILON);
            assert_eq!(window.dt_seconds, 600);
        }
        other => panic!("unexpected trigger {other:?}"),
    }
}

#[test]
fn unknown_trigger_type_rejected() {
    let yaml = "type: webhook\nurl: http://example.com\n";
    assert!(serde_yaml::from_str::<Trigger>(yaml).is_err());
}

#[test]
fn action_variants_deserialize() {
    let yaml = r#"
- type: retention
  strategy: default
  time_unit: day
  retention_time: 30
  warning_time: 7
  exceptions:
    - condition: "metadata.priority == 'high'"
      retention_time: -1
- type: transform
  preserve_original: false
  methods:
    - dimension: temporal
      algorithm: mean
      factor: 4
    - dimension: spatial
      algorithm: sum
      factor: 2
      apply_to_channels: [128, 256]
- type: roi
  channel_range: [0, 64]
- type: time-window
  from: "2026-01-01T00:00:00Z"
  to: "2026-02-01T00:00:00Z"
- type: event-proximity
  radius_km: 2.0
  dt_seconds: 600
  event_source: ais
"#;
    let actions: Vec<Action> = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(actions.len(), 5);
    assert_eq!(actions[0].kind(), "retention");
    assert_eq!(actions[1].kind(), "transform");
    assert_eq!(actions[2].kind(), "roi");
    assert_eq!(actions[3].kind(), "time-window");
    assert_eq!(actions[4].kind(), "event-proximity");

    match &actions[0] {
        Action::Retention(spec) => {
            assert_eq!(spec.time_unit, TimeUnit::Day);
            assert_eq!(spec.exceptions[0].retention_time, -1);
        }
        other => panic!("unexpected action {other:?}"),
    }
    match &actions[1] {
        Action::Transform(spec) => {
            assert!(!spec.preserve_original);
            assert_eq!(spec.methods[0].apply_to_channels, None);
            assert_eq!(spec.methods[1].apply_to_channels, Some([128, 256]));
        }
        other => panic!("unexpected action {other:?}"),
    }
}

#[test]
fn retention_defaults() {
    let yaml = r#"
type: retention
time_unit: hour
retention_time: 48
"#;
    let action: Action = serde_yaml::from_str(yaml).unwrap();
    match action {
        Action::Retention(spec) => {
            assert_eq!(spec.warning_time, 0);
            assert!(spec.exceptions.is_empty());
            assert!(spec.strategy.is_none());
        }
        other => panic!("unexpected action {other:?}"),
    }
}

#[test]
fn unknown_action_type_rejected() {
    let yaml = r#"
type: compress
level: 9
"#;
    assert!(serde_yaml::from_str::<Action>(yaml).is_err());
}

#[test]
fn time_unit_conversion_factors() {
    assert_eq!(TimeUnit::Second.seconds(), 1.0);
    assert_eq!(TimeUnit::Minute.seconds(), 60.0);
    assert_eq!(TimeUnit::Hour.seconds(), 3_600.0);
    assert_eq!(TimeUnit::Day.seconds(), 86_400.0);
}

#[test]
fn trigger_spec_snapshot_roundtrips_as_json() {
    let trigger = Trigger::Schedule {
        spec: ScheduleSpec::Cron { cron: "*/2 * * * *".to_string() },
    };
    let snapshot = serde_json::to_value(&trigger).unwrap();
    assert_eq!(snapshot["type"], "schedule");
    let back: Trigger = serde_json::from_value(snapshot).unwrap();
    assert_eq!(back, trigger);
}
