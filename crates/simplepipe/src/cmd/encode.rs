use std::fs;
use std::path::Path;

use bytes::BytesMut;
use serde::Serialize;
use simplepipe_frame::{encode_payload, encode_status, PipeKey, DEFAULT_MAX_PAYLOAD};
use simplepipe_schema::SchemaRegistry;

use crate::cmd::EncodeArgs;
use crate::exit::{frame_error, io_error, schema_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{body_preview, new_table, print_json, print_raw, OutputFormat, SCHEMA_BASE};

#[derive(Serialize)]
struct EncodeOutput<'a> {
    schema_id: String,
    key: &'a str,
    kind: &'static str,
    size: usize,
    wire: String,
}

pub fn run(args: EncodeArgs, format: OutputFormat) -> CliResult<i32> {
    let key = parse_key(&args.key)?;
    let mut wire = BytesMut::new();

    let kind = if let Some(status) = args.status {
        encode_status(&key, status.into(), &mut wire);
        "status"
    } else {
        let tag = args
            .tag
            .as_deref()
            .ok_or_else(|| CliError::new(USAGE, "--tag is required for payload segments"))?;
        let body = resolve_body(&args)?;
        if body.len() > DEFAULT_MAX_PAYLOAD {
            return Err(CliError::new(
                USAGE,
                format!("payload of {} bytes exceeds {DEFAULT_MAX_PAYLOAD}", body.len()),
            ));
        }
        if let Some(dir) = &args.validate {
            validate_body(dir, tag, &body)?;
        }
        encode_payload(&key, tag, &body, &mut wire)
            .map_err(|err| frame_error("encode failed", err))?;
        "payload"
    };
    tracing::debug!(%key, kind, size = wire.len(), "encoded segment");

    match format {
        OutputFormat::Json => print_json(&EncodeOutput {
            schema_id: format!("{SCHEMA_BASE}/encode.schema.json"),
            key: key.as_str(),
            kind,
            size: wire.len(),
            wire: body_preview(&wire),
        }),
        OutputFormat::Table => {
            let mut table = new_table(vec!["KEY", "KIND", "SIZE", "WIRE"]);
            table.add_row(vec![
                key.to_string(),
                kind.to_string(),
                wire.len().to_string(),
                body_preview(&wire),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}", body_preview(&wire)),
        OutputFormat::Raw => print_raw(&wire),
    }
    Ok(SUCCESS)
}

pub(crate) fn parse_key(input: &str) -> CliResult<PipeKey> {
    input
        .parse()
        .map_err(|err| CliError::new(USAGE, format!("bad pipe key: {err}")))
}

fn resolve_body(args: &EncodeArgs) -> CliResult<Vec<u8>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(json.as_bytes().to_vec());
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}

fn validate_body(dir: &Path, tag: &str, body: &[u8]) -> CliResult<()> {
    let schemas = SchemaRegistry::from_directory(dir)
        .map_err(|err| schema_error(&format!("loading schemas from {}", dir.display()), err))?;
    schemas
        .validate(tag, body)
        .map_err(|err| schema_error("body rejected", err))
}
