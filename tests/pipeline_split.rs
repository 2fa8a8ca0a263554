mod common;

use common::{write_input, MockEncoder, ScriptedEncode, MB};
use tempfile::TempDir;
use vidfit::config::Settings;
use vidfit::pipeline::Optimizer;
use vidfit::report::{SessionReport, StatusKind};

/// Floors tuned so a 600s input fails the pre-flight but its 300s halves
/// pass it: (150+64) kbps * 600s / 8 is ~15.3 MB against a 9.8 MB target.
fn split_settings(output_dir: &std::path::Path) -> Settings {
    Settings {
        video_floor_kbps: 150,
        output_dir: output_dir.to_path_buf(),
        ..Settings::default()
    }
}

#[test]
fn preflight_forces_split_without_attempting_rescue() {
    let tmp = TempDir::new().unwrap();
    let settings = split_settings(&tmp.path().join("out"));
    let input = write_input(tmp.path(), "long.mkv", 20 * MB);

    let encoder = MockEncoder {
        cut_sizes: (6 * MB, 6 * MB),
        ..MockEncoder::new()
    };
    encoder.set_duration(&input, 600.0);

    let mut report = SessionReport::new();
    let mut optimizer = Optimizer::new(&encoder, &settings, tmp.path().join("work"));
    optimizer.process(&input, &mut report).unwrap();

    // No keyframe registered: geometric midpoint is the cut point, and no
    // encode was ever attempted before the split decision.
    assert_eq!(*encoder.cut_points.borrow(), vec![300.0]);
    assert_eq!(encoder.encode_calls(), 0);

    // Three records: both halves (already under the ceiling, copied) then
    // the recombined parent.
    let records = report.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].name, "long.mkv.part1");
    assert_eq!(records[0].status, StatusKind::Copied);
    assert_eq!(records[1].name, "long.mkv.part2");
    assert_eq!(records[1].status, StatusKind::Copied);
    assert_eq!(records[2].name, "long.mkv");
    assert_eq!(records[2].status, StatusKind::Split);
    assert_eq!(records[2].final_bytes, Some(12 * MB));
    assert!(!report.any_failures());

    // The recombined file landed in the output area.
    let output = settings.output_dir.join("long.fit.mp4");
    assert_eq!(std::fs::metadata(&output).unwrap().len(), 12 * MB);
}

#[test]
fn keyframe_before_midpoint_is_preferred() {
    let tmp = TempDir::new().unwrap();
    let settings = split_settings(&tmp.path().join("out"));
    let input = write_input(tmp.path(), "long.mkv", 20 * MB);

    let encoder = MockEncoder {
        keyframe: Some(290.0),
        cut_sizes: (6 * MB, 6 * MB),
        ..MockEncoder::new()
    };
    encoder.set_duration(&input, 600.0);

    let mut report = SessionReport::new();
    let mut optimizer = Optimizer::new(&encoder, &settings, tmp.path().join("work"));
    optimizer.process(&input, &mut report).unwrap();

    assert_eq!(*encoder.keyframe_queries.borrow(), vec![300.0]);
    assert_eq!(*encoder.cut_points.borrow(), vec![290.0]);
    assert_eq!(report.records().last().unwrap().status, StatusKind::Split);
}

#[test]
fn bogus_near_zero_keyframe_falls_back_to_midpoint() {
    let tmp = TempDir::new().unwrap();
    let settings = split_settings(&tmp.path().join("out"));
    let input = write_input(tmp.path(), "long.mkv", 20 * MB);

    let encoder = MockEncoder {
        keyframe: Some(0.3),
        cut_sizes: (6 * MB, 6 * MB),
        ..MockEncoder::new()
    };
    encoder.set_duration(&input, 600.0);

    let mut report = SessionReport::new();
    let mut optimizer = Optimizer::new(&encoder, &settings, tmp.path().join("work"));
    optimizer.process(&input, &mut report).unwrap();

    assert_eq!(*encoder.cut_points.borrow(), vec![300.0]);
    assert_eq!(report.records().last().unwrap().status, StatusKind::Split);
}

#[test]
fn empty_segment_fails_the_split_without_recursing() {
    let tmp = TempDir::new().unwrap();
    let settings = split_settings(&tmp.path().join("out"));
    let input = write_input(tmp.path(), "long.mkv", 20 * MB);

    let encoder = MockEncoder {
        cut_sizes: (6 * MB, 0),
        ..MockEncoder::new()
    };
    encoder.set_duration(&input, 600.0);

    let mut report = SessionReport::new();
    let mut optimizer = Optimizer::new(&encoder, &settings, tmp.path().join("work"));
    optimizer.process(&input, &mut report).unwrap();

    let records = report.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, StatusKind::SplitFailed);
    assert!(report.any_failures());
}

#[test]
fn failed_child_fails_the_parent_but_sibling_record_stands() {
    let tmp = TempDir::new().unwrap();
    let settings = split_settings(&tmp.path().join("out"));
    let input = write_input(tmp.path(), "long.mkv", 20 * MB);

    // Part 1 fits as-is; part 2 is over the ceiling and its only encode
    // attempt crashes.
    let encoder = MockEncoder {
        cut_sizes: (6 * MB, 11 * MB),
        ..MockEncoder::new()
    };
    encoder.set_duration(&input, 600.0);
    encoder.push(ScriptedEncode::Fail("corrupt segment"));

    let mut report = SessionReport::new();
    let mut optimizer = Optimizer::new(&encoder, &settings, tmp.path().join("work"));
    optimizer.process(&input, &mut report).unwrap();

    let records = report.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].name, "long.mkv.part1");
    assert_eq!(records[0].status, StatusKind::Copied);
    assert_eq!(records[1].name, "long.mkv.part2");
    assert_eq!(records[1].status, StatusKind::EncodeFailed);
    assert_eq!(records[2].name, "long.mkv");
    assert_eq!(records[2].status, StatusKind::SplitFailed);
    assert_eq!(records[2].final_bytes, None);
}
