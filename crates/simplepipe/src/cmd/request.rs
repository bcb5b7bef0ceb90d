use serde::Serialize;
use simplepipe_frame::{PipeRequest, RequestType};

use crate::cmd::encode::parse_key;
use crate::cmd::{RequestAction, RequestArgs, RequestBuildArgs};
use crate::exit::{frame_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{new_table, print_json, OutputFormat, SCHEMA_BASE};

#[derive(Serialize)]
struct RequestOutput {
    schema_id: String,
    form: String,
    key: String,
    kind: char,
    delivers_data: bool,
    sequence: u64,
    counter: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    domain: Option<String>,
}

impl From<&PipeRequest> for RequestOutput {
    fn from(request: &PipeRequest) -> Self {
        Self {
            schema_id: format!("{SCHEMA_BASE}/request.schema.json"),
            form: request.encode(),
            key: request.key.to_string(),
            kind: request.kind.as_char(),
            delivers_data: request.kind.delivers_data(),
            sequence: request.sequence,
            counter: request.counter,
            domain: request.domain.clone(),
        }
    }
}

pub fn run(args: RequestArgs, format: OutputFormat) -> CliResult<i32> {
    let request = match args.action {
        RequestAction::Build(build) => build_request(build)?,
        RequestAction::Parse(parse) => PipeRequest::parse(&parse.form)
            .map_err(|err| frame_error("request rejected", err))?,
    };
    print_request(&request, format);
    Ok(SUCCESS)
}

fn build_request(args: RequestBuildArgs) -> CliResult<PipeRequest> {
    let key = parse_key(&args.key)?;
    let kind = RequestType::from_char(args.kind).ok_or_else(|| {
        CliError::new(
            USAGE,
            format!("unknown request type {:?} (expected q, u, n, s, x or c)", args.kind),
        )
    })?;
    let request = PipeRequest::new(key, kind, args.sequence, args.counter);
    Ok(match args.domain {
        Some(domain) => request.with_domain(domain),
        None => request,
    })
}

fn print_request(request: &PipeRequest, format: OutputFormat) {
    let out = RequestOutput::from(request);
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = new_table(vec!["KEY", "TYPE", "SEQUENCE", "COUNTER", "DOMAIN"]);
            table.add_row(vec![
                out.key,
                out.kind.to_string(),
                out.sequence.to_string(),
                out.counter.to_string(),
                out.domain.unwrap_or_default(),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => println!("{}", out.form),
    }
}
