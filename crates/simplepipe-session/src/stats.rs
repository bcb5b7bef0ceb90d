use std::fmt::Write as _;
use std::time::Instant;

use serde::Serialize;
use simplepipe_frame::PipeKey;

use crate::session::PipeSession;

/// Point-in-time view of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub key: PipeKey,
    pub live: bool,
    pub managed: bool,
    pub pending: usize,
    pub pipe_sequence: u64,
    pub notify_sequence: u64,
    pub query_failed_retries: u32,
    pub idle_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compound: Option<CompoundSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompoundSummary {
    pub capacity: usize,
    pub active: Option<usize>,
    pub slots: Vec<SlotSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotSummary {
    pub index: usize,
    pub live: bool,
    pub pending: usize,
}

impl SessionSummary {
    /// Returns `None` for a session without a key.
    pub fn capture(session: &PipeSession, now: Instant) -> Option<Self> {
        let key = session.key()?;
        let idle = now.saturating_duration_since(session.timers().last_traffic());
        let compound = session.slots().map(|slots| CompoundSummary {
            capacity: slots.capacity(),
            active: slots.active_index(),
            slots: slots
                .iter()
                .map(|(index, member)| SlotSummary {
                    index,
                    live: member.is_live(),
                    pending: member.pending_len(),
                })
                .collect(),
        });
        Some(Self {
            key,
            live: session.is_live(),
            managed: session.is_managed(),
            pending: session.pending_len(),
            pipe_sequence: session.pipe_sequence(),
            notify_sequence: session.notify_sequence(),
            query_failed_retries: session.query_failed_retries(),
            idle_ms: u64::try_from(idle.as_millis()).unwrap_or(u64::MAX),
            compound,
        })
    }
}

/// Render the monitor report.
pub fn render_statistics(summaries: &[SessionSummary]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Pipe monitor");
    let _ = writeln!(out, "Total pipe count: {}", summaries.len());
    for summary in summaries {
        match &summary.compound {
            Some(compound) => {
                let _ = writeln!(
                    out,
                    "Compound pipe {} ({}/{} slots, active {}):",
                    summary.key,
                    compound.slots.len(),
                    compound.capacity,
                    compound
                        .active
                        .map_or_else(|| "none".to_string(), |index| index.to_string())
                );
                for slot in &compound.slots {
                    let _ = writeln!(
                        out,
                        "  slot {}: buffer size {}, alive {}",
                        slot.index, slot.pending, slot.live
                    );
                }
            }
            None => {
                let _ = writeln!(
                    out,
                    "Pipe {}: buffer size {}, alive {}, sequence {}/{}",
                    summary.key,
                    summary.pending,
                    summary.live,
                    summary.pipe_sequence,
                    summary.notify_sequence
                );
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(key: &str, compound: Option<CompoundSummary>) -> SessionSummary {
        SessionSummary {
            key: key.parse().unwrap(),
            live: true,
            managed: true,
            pending: 2,
            pipe_sequence: 3,
            notify_sequence: 1,
            query_failed_retries: 0,
            idle_ms: 10,
            compound,
        }
    }

    #[test]
    fn report_lists_pipes_and_slots() {
        let report = render_statistics(&[
            summary("Ab12Cd", None),
            summary(
                "Zz99Yy",
                Some(CompoundSummary {
                    capacity: 2,
                    active: Some(0),
                    slots: vec![SlotSummary {
                        index: 0,
                        live: false,
                        pending: 4,
                    }],
                }),
            ),
        ]);
        assert_eq!(
            report,
            "Pipe monitor\n\
             Total pipe count: 2\n\
             Pipe Ab12Cd: buffer size 2, alive true, sequence 3/1\n\
             Compound pipe Zz99Yy (1/2 slots, active 0):\n  \
             slot 0: buffer size 4, alive false\n"
        );
    }

    #[test]
    fn summary_serializes_without_empty_compound() {
        let json = serde_json::to_value(summary("Ab12Cd", None)).unwrap();
        assert_eq!(json["key"], "Ab12Cd");
        assert!(json.get("compound").is_none());
    }
}
