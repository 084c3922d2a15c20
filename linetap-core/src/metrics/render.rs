use super::METRIC_PREFIX;
use super::registry::MetricsState;
use std::fmt::Write;

/// Render `state` in the flat text exposition format.
///
/// Output is deterministic for a given state and `now`: families always come
/// in the same order and labels are sorted.
pub(super) fn render(state: &MetricsState, now: f64) -> String {
    let mut out = String::with_capacity(2048);

    counter(&mut out, "lines_total", state.lines_total);
    counter(&mut out, "bytes_total", state.bytes_total);
    counter(&mut out, "files_rotated_total", state.files_rotated_total);
    counter(&mut out, "metrics_scrapes_total", state.scrapes_total);
    counter(
        &mut out,
        "streams_connected_total",
        state.streams_connected_total,
    );
    counter(
        &mut out,
        "streams_disconnected_total",
        state.streams_disconnected_total,
    );
    counter(
        &mut out,
        "stream_bytes_sent_total",
        state.stream_bytes_sent_total,
    );
    counter(
        &mut out,
        "stream_lines_dropped_total",
        state.stream_lines_dropped_total,
    );
    counter(&mut out, "idle_alerts_total", state.idle_alerts_total);
    counter(&mut out, "write_errors_total", state.write_errors_total);

    gauge(&mut out, "current_file_bytes", state.current_file_bytes);
    gauge(
        &mut out,
        "current_file_disk_bytes",
        state.current_file_disk_bytes,
    );
    gauge(
        &mut out,
        "current_compression_ratio",
        state.current_compression_ratio,
    );
    gauge(&mut out, "start_time_seconds", state.start_time);
    gauge(
        &mut out,
        "uptime_seconds",
        (now - state.start_time).max(0.0),
    );
    gauge(
        &mut out,
        "last_rotation_time_seconds",
        state.last_rotation_time,
    );
    gauge(&mut out, "last_write_time_seconds", state.last_write_time);

    family(&mut out, "process_running", "gauge");
    let _ = writeln!(
        out,
        "{METRIC_PREFIX}_process_running{{mode=\"{}\"}} {}",
        state.mode.as_str(),
        u8::from(state.process_running)
    );

    gauge(&mut out, "streams_current", state.streams_current);
    gauge(&mut out, "idle_active", u8::from(state.idle_active));
    gauge(
        &mut out,
        "idle_threshold_seconds",
        state.idle_threshold_seconds,
    );
    gauge(&mut out, "writer_failing", u8::from(state.writer_failing));

    let labels = state
        .config
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label(v)))
        .collect::<Vec<_>>()
        .join(",");
    family(&mut out, "config_info", "gauge");
    let _ = writeln!(out, "{METRIC_PREFIX}_config_info{{{labels}}} 1");

    if !state.current_file_path.is_empty() {
        family(&mut out, "current_file_info", "gauge");
        let _ = writeln!(
            out,
            "{METRIC_PREFIX}_current_file_info{{path=\"{}\"}} 1",
            escape_label(&state.current_file_path)
        );
    }

    if let Some((host, port)) = &state.metrics_bind {
        family(&mut out, "metrics_bind_info", "gauge");
        let _ = writeln!(
            out,
            "{METRIC_PREFIX}_metrics_bind_info{{host=\"{}\",port=\"{port}\"}} 1",
            escape_label(host)
        );
    }

    out
}

fn family(out: &mut String, name: &str, kind: &str) {
    let _ = writeln!(out, "# TYPE {METRIC_PREFIX}_{name} {kind}");
}

fn counter(out: &mut String, name: &str, value: u64) {
    family(out, name, "counter");
    let _ = writeln!(out, "{METRIC_PREFIX}_{name} {value}");
}

fn gauge(out: &mut String, name: &str, value: impl std::fmt::Display) {
    family(out, name, "gauge");
    let _ = writeln!(out, "{METRIC_PREFIX}_{name} {value}");
}

/// Escape a label value: backslash, double quote and newline.
pub(super) fn escape_label(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    for c in v.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}
