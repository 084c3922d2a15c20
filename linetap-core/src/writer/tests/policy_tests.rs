use crate::writer::{CompressMode, PolicyDelta, PolicyField, RotationPolicy};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn compress_mode_parses_case_insensitively() {
    assert_eq!("none".parse::<CompressMode>(), Ok(CompressMode::None));
    assert_eq!("Inline".parse::<CompressMode>(), Ok(CompressMode::Inline));
    assert_eq!(" AFTER ".parse::<CompressMode>(), Ok(CompressMode::After));

    let err = "bogus".parse::<CompressMode>().unwrap_err();
    assert!(err.contains("none, inline, after"), "{err}");
}

#[test]
fn delta_reports_only_fields_that_changed() {
    let mut policy = RotationPolicy::default();
    let delta = PolicyDelta {
        out_dir: Some(PathBuf::from(".")),
        compress: Some(CompressMode::After),
        retain: Some(policy.retain),
        interval: Some(Duration::from_secs(60)),
        timestamp: Some(true),
        ..PolicyDelta::default()
    };

    let changed = delta.apply_to(&mut policy);
    assert_eq!(
        changed,
        vec![
            PolicyField::Compress,
            PolicyField::Interval,
            PolicyField::Timestamp
        ]
    );
    assert_eq!(policy.compress, CompressMode::After);
    assert_eq!(policy.interval, Duration::from_secs(60));
    assert!(policy.timestamp);

    assert!(delta.apply_to(&mut policy).is_empty());
}

#[test]
fn only_location_and_format_need_a_new_file() {
    let needs: Vec<PolicyField> = [
        PolicyField::OutDir,
        PolicyField::Prefix,
        PolicyField::Compress,
        PolicyField::Retain,
        PolicyField::MaxBytes,
        PolicyField::Interval,
        PolicyField::Echo,
        PolicyField::Timestamp,
    ]
    .into_iter()
    .filter(PolicyField::needs_new_file)
    .collect();
    assert_eq!(
        needs,
        vec![PolicyField::OutDir, PolicyField::Prefix, PolicyField::Compress]
    );
}

#[test]
fn empty_delta() {
    assert!(PolicyDelta::default().is_empty());
    assert!(
        !PolicyDelta {
            echo: Some(false),
            ..PolicyDelta::default()
        }
        .is_empty()
    );
}
