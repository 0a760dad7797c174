//! Fixed-width diagnostic blocks for received events.
//!
//! Human-auditable output only; nothing parses these lines.

use super::event::{JoiningSystemEvent, ResultReadyEvent};
use super::latency::{LatencyReport, TimestampPrecision, format_local, format_optional};
use super::value::Value;

const LABEL_WIDTH: usize = 40;
const RULE_WIDTH: usize = 80;

fn line(label: &str, value: impl std::fmt::Display) -> String {
    format!("{label:<LABEL_WIDTH$} : {value}")
}

fn rule() -> String {
    "-".repeat(RULE_WIDTH)
}

/// Lines describing one result ready event and its latency.
///
/// `report` is `None` when the event carried no generation time.
#[must_use]
pub fn result_event_lines(
    event: &ResultReadyEvent,
    report: Option<&LatencyReport>,
    session_clock: Option<chrono::DateTime<chrono::Utc>>,
    precision: TimestampPrecision,
) -> Vec<String> {
    let header = &event.header;
    let unavailable = || "Unavailable".to_string();
    vec![
        rule(),
        line("RESULT EVENT RECEIVED", &header.message),
        line(
            "1. StartTime of Tightening",
            format_optional(event.processing_start(), precision),
        ),
        line(
            "2. EndTime of Tightening",
            format_optional(event.processing_end(), precision),
        ),
        line(
            "3. Result Creation Time",
            format_optional(event.creation_time(), precision),
        ),
        line(
            "4. Result Event Generated Time",
            format_optional(header.time, precision),
        ),
        line("5. Client Time", format_local(header.received_at(), precision)),
        line("6. Server Time", format_optional(session_clock, precision)),
        line(
            "Event Gap (Generated -> Client)",
            report.map_or_else(unavailable, LatencyReport::event_gap_display),
        ),
        line(
            "Clock Drift (Server -> Client)",
            report.map_or_else(unavailable, LatencyReport::clock_drift_display),
        ),
        line(
            "*** Turn around Time (EndTime -> Client)",
            report.map_or_else(unavailable, LatencyReport::turnaround_display),
        ),
        rule(),
    ]
}

/// Lines describing one joining system event, entities and values expanded.
#[must_use]
pub fn joining_event_lines(event: &JoiningSystemEvent, precision: TimestampPrecision) -> Vec<String> {
    let header = &event.header;
    let mut lines = vec![
        rule(),
        line("JOINING SYSTEM EVENT", &header.message),
        rule(),
        line("EventType", &header.event_type),
        line("EventId", &header.event_id),
        line("SourceName", &header.source_name),
        line("SourceNode", &header.source_node),
        line("Severity", header.severity),
        line("Time", format_optional(header.time, precision)),
        line("ReceiveTime", format_optional(header.receive_time, precision)),
    ];

    match &event.local_time {
        Some(local_time) => {
            lines.push(line("LocalTime.Offset", field_text(local_time, "Offset")));
            lines.push(line(
                "LocalTime.DaylightSavingInOffset",
                field_text(local_time, "DaylightSavingInOffset"),
            ));
        }
        None => lines.push(line("LocalTime", "Unavailable")),
    }

    lines.push(line("ConditionClassId", opt(event.condition_class_id.as_deref())));
    lines.push(line("ConditionClassName", opt(event.condition_class_name.as_deref())));
    lines.push(line(
        "ConditionSubClassId",
        event.condition_sub_class_id.join(", "),
    ));
    lines.push(line(
        "ConditionSubClassName",
        event.condition_sub_class_name.join(", "),
    ));
    lines.push(line(
        "EventCode",
        event.event_code.as_ref().map_or_else(String::new, ToString::to_string),
    ));
    lines.push(line("EventText", opt(event.event_text.as_deref())));
    lines.push(line("JoiningTechnology", opt(event.joining_technology.as_deref())));

    if event.associated_entities.is_empty() {
        lines.push(line("AssociatedEntities", "[]"));
    } else {
        lines.push(format!("{:<LABEL_WIDTH$} :", "AssociatedEntities"));
        for entity in &event.associated_entities {
            lines.push(line("  Entity Name", field_text(entity, "Name")));
            lines.push(line("  Description", field_text(entity, "Description")));
            lines.push(line("  EntityId", field_text(entity, "EntityId")));
            lines.push(line("  EntityType", field_text(entity, "EntityType")));
            lines.push(line("  IsExternal", field_text(entity, "IsExternal")));
        }
    }

    if event.reported_values.is_empty() {
        lines.push(line("ReportedValues", "[]"));
    } else {
        lines.push(format!("{:<LABEL_WIDTH$} :", "ReportedValues"));
        for reported in &event.reported_values {
            let units = reported.field("EngineeringUnits");
            lines.push(line("  Name", field_text(reported, "Name")));
            lines.push(line(
                "  Current",
                path_text(reported, &["CurrentValue", "Value"]),
            ));
            lines.push(line(
                "  Previous",
                path_text(reported, &["PreviousValue", "Value"]),
            ));
            lines.push(line(
                "  PhysicalQuantity",
                field_text(reported, "PhysicalQuantity"),
            ));
            lines.push(line("  LowLimit", field_text(reported, "LowLimit")));
            lines.push(line("  HighLimit", field_text(reported, "HighLimit")));
            lines.push(line(
                "  Units",
                units.map_or_else(String::new, |u| field_text(u, "DisplayName")),
            ));
            lines.push(line(
                "  Description",
                units.map_or_else(String::new, |u| field_text(u, "Description")),
            ));
        }
    }

    lines.push(rule());
    lines
}

/// Logs a result ready event block at `info` level.
pub fn log_result_event(
    event: &ResultReadyEvent,
    report: Option<&LatencyReport>,
    session_clock: Option<chrono::DateTime<chrono::Utc>>,
    precision: TimestampPrecision,
) {
    for text in result_event_lines(event, report, session_clock, precision) {
        tracing::info!("{text}");
    }
}

/// Logs a joining system event block at `info` level.
pub fn log_joining_event(event: &JoiningSystemEvent, precision: TimestampPrecision) {
    for text in joining_event_lines(event, precision) {
        tracing::info!("{text}");
    }
}

fn opt(value: Option<&str>) -> &str {
    value.unwrap_or("")
}

fn field_text(value: &Value, name: &str) -> String {
    value.field(name).map_or_else(String::new, ToString::to_string)
}

fn path_text(value: &Value, path: &[&str]) -> String {
    value.path(path).map_or_else(String::new, ToString::to_string)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::domain::Record;
    use crate::protocol::{NodeRef, RawEvent};

    fn result_event() -> ResultReadyEvent {
        let now = Utc::now();
        let raw = RawEvent::new(NodeRef::new("ns=3;i=1003"))
            .with("EventId", "r-9")
            .with("Message", "Result 9 ready")
            .with("Time", now)
            .with(
                "Result",
                Record::new("JoiningResultDataType").with(
                    "ResultMetaData",
                    Record::new("JoiningResultMetaDataType").with(
                        "ProcessingTimes",
                        Record::new("ProcessingTimesDataType").with("EndTime", now),
                    ),
                ),
            );
        let Ok(event) = ResultReadyEvent::from_raw(&raw, now + Duration::milliseconds(12)) else {
            panic!("snapshot should succeed");
        };
        event
    }

    #[test]
    fn result_block_is_fixed_width() {
        let event = result_event();
        let Some(generated) = event.header.time else {
            panic!("event time set");
        };
        let report = LatencyReport::compute(generated, event.header.received_at(), None)
            .with_processing_end(event.processing_end());
        let lines = result_event_lines(&event, Some(&report), None, TimestampPrecision::Millis);

        assert_eq!(lines.first().map(String::len), Some(RULE_WIDTH));
        let Some(title) = lines.get(1) else {
            panic!("title line");
        };
        assert!(title.starts_with("RESULT EVENT RECEIVED"));
        assert_eq!(title.find(" : "), Some(LABEL_WIDTH));
        assert!(lines.iter().any(|l| l.ends_with("12.000 ms (behind)")));
        assert!(lines.iter().any(|l| l.starts_with("6. Server Time") && l.ends_with("Unavailable")));
    }

    #[test]
    fn result_block_without_report_marks_gaps_unavailable() {
        let lines = result_event_lines(&result_event(), None, None, TimestampPrecision::Millis);
        let gap_lines = lines
            .iter()
            .filter(|l| l.contains("->") && l.ends_with("Unavailable"))
            .count();
        assert_eq!(gap_lines, 3);
    }

    #[test]
    fn joining_block_expands_entities() {
        let raw = RawEvent::new(NodeRef::new("ns=4;i=1007"))
            .with("EventId", "j-1")
            .with(
                "JoiningSystemEventContent/AssociatedEntities",
                vec![Value::from(
                    Record::new("EntityDataType")
                        .with("Name", "Tool 1")
                        .with("EntityId", "T-001"),
                )],
            );
        let Ok(event) = JoiningSystemEvent::from_raw(&raw, Utc::now()) else {
            panic!("snapshot should succeed");
        };
        let lines = joining_event_lines(&event, TimestampPrecision::Millis);
        assert!(lines.iter().any(|l| l.starts_with("  Entity Name") && l.ends_with("Tool 1")));
        assert!(lines.iter().any(|l| l.starts_with("ReportedValues") && l.ends_with("[]")));
        assert!(lines.iter().any(|l| l.starts_with("LocalTime ") && l.ends_with("Unavailable")));
    }
}
