use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use simplepipe_frame::Segment;

pub const SCHEMA_BASE: &str = "https://schemas.3leaps.dev/simplepipe/cli/v1";

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct SegmentOutput<'a> {
    schema_id: String,
    key: &'a str,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<String>,
}

impl<'a> SegmentOutput<'a> {
    fn from_segment(segment: &'a Segment) -> Self {
        let schema_id = format!("{SCHEMA_BASE}/segment.schema.json");
        match segment {
            Segment::Status { key, status } => Self {
                schema_id,
                key: key.as_str(),
                kind: "status",
                status: Some(status.name()),
                tag: None,
                size: None,
                body: None,
            },
            Segment::Payload { key, tag, body } => Self {
                schema_id,
                key: key.as_str(),
                kind: "payload",
                status: None,
                tag: Some(tag.as_str()),
                size: Some(body.len()),
                body: Some(body_preview(body)),
            },
        }
    }
}

/// Print decoded segments. Raw output writes payload bodies back to back and
/// skips statuses.
pub fn print_segments(segments: &[Segment], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for segment in segments {
                print_json(&SegmentOutput::from_segment(segment));
            }
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["KEY", "KIND", "TAG/STATUS", "SIZE", "BODY"]);
            for segment in segments {
                let out = SegmentOutput::from_segment(segment);
                table.add_row(vec![
                    out.key.to_string(),
                    out.kind.to_string(),
                    out.tag.or(out.status).unwrap_or_default().to_string(),
                    out.size.map(|s| s.to_string()).unwrap_or_default(),
                    out.body.unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for segment in segments {
                match segment {
                    Segment::Status { key, status } => {
                        println!("key={key} status={}", status.name());
                    }
                    Segment::Payload { key, tag, body } => println!(
                        "key={key} tag={tag} size={} body={}",
                        body.len(),
                        body_preview(body)
                    ),
                }
            }
        }
        OutputFormat::Raw => {
            for segment in segments {
                if let Segment::Payload { body, .. } = segment {
                    print_raw(body);
                }
            }
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

pub fn body_preview(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", body.len()),
    }
}
