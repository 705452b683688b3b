//! Minimal Prometheus text exposition, rendered from a status snapshot.

use std::fmt::Display;
use std::fmt::Write;

use memscale_core::{Lifecycle, StatusView};

fn gauge<V: Display>(out: &mut String, name: &str, help: &str, value: V) {
    // Writing to a String cannot fail.
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}

fn lifecycle_code(lifecycle: Lifecycle) -> u8 {
    match lifecycle {
        Lifecycle::Idle => 0,
        Lifecycle::Running => 1,
        Lifecycle::Draining => 2,
        Lifecycle::Terminating => 3,
        Lifecycle::Stopped => 4,
    }
}

pub(crate) fn render(view: &StatusView) -> String {
    let mut out = String::with_capacity(1024);

    gauge(
        &mut out,
        "memscale_lifecycle_state",
        "Controller lifecycle (0=idle 1=running 2=draining 3=terminating 4=stopped)",
        lifecycle_code(view.lifecycle),
    );
    gauge(
        &mut out,
        "memscale_workers_current",
        "Worker processes currently on the roster",
        view.workers.len(),
    );
    gauge(
        &mut out,
        "memscale_workers_min",
        "Configured minimum worker count",
        view.limits.min_workers,
    );
    gauge(
        &mut out,
        "memscale_workers_max",
        "Configured maximum worker count",
        view.limits.max_workers,
    );
    gauge(
        &mut out,
        "memscale_autoscaling_enabled",
        "Whether memory-driven scaling is active",
        u8::from(view.limits.autoscaling_enabled),
    );

    if let Some(memory) = &view.memory {
        gauge(
            &mut out,
            "memscale_memory_total_bytes",
            "Total host memory",
            memory.total_bytes,
        );
        gauge(
            &mut out,
            "memscale_memory_available_bytes",
            "Available host memory at the last sample",
            memory.available_bytes,
        );
        gauge(
            &mut out,
            "memscale_memory_used_percent",
            "Used host memory as a percentage of total",
            format!("{:.2}", memory.used_percent()),
        );
    }

    if let Some(decision) = &view.last_decision {
        gauge(
            &mut out,
            "memscale_scale_target",
            "Worker target of the most recent scaling decision",
            decision.target,
        );
    }

    out
}
