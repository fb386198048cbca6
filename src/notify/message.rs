//! Operator-facing alert text.
//!
//! Messages use the small HTML subset chat transports understand (`<b>`, `<i>`).

use crate::alert::{AlertEvent, AlertKind, Bound};
use crate::reading::Metric;
use chrono::{DateTime, Utc};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

fn format_value(metric: Metric, value: f64) -> String {
    match metric {
        Metric::Co2 => format!("{value:.0} {}", metric.unit()),
        Metric::Temperature | Metric::Humidity => format!("{value:.1} {}", metric.unit()),
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn alert_message(event: &AlertEvent, device: &str) -> String {
    let metric = event.metric;
    let value = format_value(metric, event.value);
    let time = event.timestamp.format(TIME_FORMAT);
    let device = escape(device);

    match event.kind {
        AlertKind::Breach { bound, threshold } => {
            let direction = match bound {
                Bound::High => "above",
                Bound::Low => "below",
            };
            format!(
                "⚠️ <b>{} alert</b> ({device})\n\n{} is {value}, {direction} the threshold of {}.\n<i>{time}</i>",
                metric.label(),
                metric.label(),
                format_value(metric, threshold),
            )
        }
        AlertKind::Recovery => format!(
            "✅ <b>{} back to normal</b> ({device})\n\n{} is {value}, within range again.\n<i>{time}</i>",
            metric.label(),
            metric.label(),
        ),
    }
}

pub fn test_message(device: &str, at: DateTime<Utc>) -> String {
    format!(
        "🧪 <b>MyCO2 test notification</b> ({})\n\nNotifications are working.\n<i>{}</i>",
        escape(device),
        at.format(TIME_FORMAT)
    )
}
