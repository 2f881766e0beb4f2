// Named-window tests: keyword parsing, UTC bounds, baselines, rate format.

use chrono::{TimeZone, Utc};
use svcstats::error::StatsError;
use svcstats::query::{TimeWindow, format_rate, parse_utc_ms};

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

#[test]
fn parses_every_known_keyword() {
    for kw in svcstats::query::WINDOW_KEYWORDS {
        let w = TimeWindow::parse(kw).unwrap();
        assert_eq!(w.keyword(), kw);
    }
}

#[test]
fn unknown_keyword_is_an_input_error_not_a_fault() {
    let err = TimeWindow::parse("lastfortnight").unwrap_err();
    match err {
        StatsError::InputValidation(msg) => {
            assert!(msg.contains("lastfortnight"));
            assert!(msg.contains("last_hour"));
        }
        other => panic!("expected InputValidation, got {other:?}"),
    }
}

#[test]
fn last_hour_bounds() {
    let now = at(2026, 3, 10, 15, 30, 0);
    let b = TimeWindow::LastHour.bounds(now);
    assert_eq!(b.stop_ms, now.timestamp_millis());
    assert_eq!(b.stop_ms - b.start_ms, 3_600_000);
    assert_eq!(b.granularity_seconds, 60);
    assert_eq!(b.trend_elems, 60);
    assert_eq!(b.window_seconds(), 3600);
}

#[test]
fn today_starts_at_utc_midnight() {
    let now = at(2026, 3, 10, 15, 30, 0);
    let b = TimeWindow::Today.bounds(now);
    assert_eq!(b.start_ms, at(2026, 3, 10, 0, 0, 0).timestamp_millis());
    assert_eq!(b.stop_ms, now.timestamp_millis());
}

#[test]
fn yesterday_is_the_full_previous_day() {
    let now = at(2026, 3, 10, 15, 30, 0);
    let b = TimeWindow::Yesterday.bounds(now);
    assert_eq!(b.start_ms, at(2026, 3, 9, 0, 0, 0).timestamp_millis());
    assert_eq!(b.stop_ms, at(2026, 3, 10, 0, 0, 0).timestamp_millis());
}

#[test]
fn last_24h_spans_a_full_day_ending_now() {
    let now = at(2026, 3, 10, 15, 30, 0);
    let b = TimeWindow::Last24h.bounds(now);
    assert_eq!(b.stop_ms - b.start_ms, 24 * 3_600_000);
    assert_eq!(b.stop_ms, now.timestamp_millis());
}

#[test]
fn this_week_starts_on_monday() {
    // 2026-03-10 is a Tuesday.
    let now = at(2026, 3, 10, 15, 30, 0);
    let b = TimeWindow::ThisWeek.bounds(now);
    assert_eq!(b.start_ms, at(2026, 3, 9, 0, 0, 0).timestamp_millis());
}

#[test]
fn this_month_and_year_start_on_the_first() {
    let now = at(2026, 3, 10, 15, 30, 0);
    let m = TimeWindow::ThisMonth.bounds(now);
    assert_eq!(m.start_ms, at(2026, 3, 1, 0, 0, 0).timestamp_millis());
    let y = TimeWindow::ThisYear.bounds(now);
    assert_eq!(y.start_ms, at(2026, 1, 1, 0, 0, 0).timestamp_millis());
}

#[test]
fn last_hour_has_three_baselines() {
    let now = at(2026, 3, 10, 15, 30, 0);
    let b = TimeWindow::LastHour.bounds(now);
    let baselines = TimeWindow::LastHour.baselines(now);
    assert_eq!(baselines.len(), 3);

    let hour = 3_600_000;
    assert_eq!(baselines[0].label, "The previous hour");
    assert_eq!(baselines[0].start_ms, b.start_ms - hour);
    assert_eq!(baselines[0].stop_ms, b.stop_ms - hour);

    assert_eq!(baselines[1].label, "Same hour the previous day");
    assert_eq!(baselines[1].start_ms, b.start_ms - 24 * hour);

    assert_eq!(baselines[2].label, "Same hour and day the previous week");
    assert_eq!(baselines[2].start_ms, b.start_ms - 7 * 24 * hour);
}

#[test]
fn other_windows_compare_to_the_previous_equal_period() {
    let now = at(2026, 3, 10, 15, 30, 0);
    for window in [
        TimeWindow::Today,
        TimeWindow::Yesterday,
        TimeWindow::Last24h,
        TimeWindow::ThisWeek,
        TimeWindow::ThisMonth,
        TimeWindow::ThisYear,
    ] {
        let b = window.bounds(now);
        let baselines = window.baselines(now);
        assert_eq!(baselines.len(), 1, "{}", window.keyword());
        assert_eq!(baselines[0].stop_ms, b.start_ms);
        assert_eq!(
            baselines[0].stop_ms - baselines[0].start_ms,
            b.stop_ms - b.start_ms
        );
    }
}

#[test]
fn parses_rfc3339_and_naive_timestamps() {
    let with_offset = parse_utc_ms("2026-03-10T15:30:00Z").unwrap();
    assert_eq!(with_offset, at(2026, 3, 10, 15, 30, 0).timestamp_millis());

    let naive = parse_utc_ms("2026-03-10T15:30:00").unwrap();
    assert_eq!(naive, with_offset);

    let fractional = parse_utc_ms("2026-03-10T15:30:00.250").unwrap();
    assert_eq!(fractional, with_offset + 250);
}

#[test]
fn malformed_timestamp_is_an_input_error() {
    let err = parse_utc_ms("next tuesday").unwrap_err();
    assert!(matches!(err, StatsError::InputValidation(_)));
}

#[test]
fn rate_formatting() {
    // Zero invocations never divide.
    assert_eq!(format_rate(0, 3600), "0.00");
    assert_eq!(format_rate(0, 0), "0.00");
    // A positive rate that rounds below 0.01 shows the floor marker.
    assert_eq!(format_rate(1, 3600), "<0.01");
    // Ordinary rates are fixed-point with two decimals.
    assert_eq!(format_rate(36, 3600), "0.01");
    assert_eq!(format_rate(120, 60), "2.00");
    assert_eq!(format_rate(90, 60), "1.50");
}
