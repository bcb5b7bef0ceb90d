use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use simplepipe_frame::{FrameConfig, Segment, SegmentReader};
use simplepipe_schema::SchemaRegistry;

use crate::cmd::DecodeArgs;
use crate::exit::{frame_error, io_error, schema_error, CliError, CliResult, SUCCESS};
use crate::output::{print_segments, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let mut config = FrameConfig {
        continue_supported: args.allow_continue,
        ..FrameConfig::default()
    };
    if let Some(max) = args.max_payload {
        config.max_payload_size = max;
    }
    let schemas = args
        .validate
        .as_deref()
        .map(|dir| {
            SchemaRegistry::from_directory(dir).map_err(|err| {
                schema_error(&format!("loading schemas from {}", dir.display()), err)
            })
        })
        .transpose()?;

    let input: Box<dyn Read> = match args.input.as_deref() {
        None => Box::new(io::stdin().lock()),
        Some(path) if path == Path::new("-") => Box::new(io::stdin().lock()),
        Some(path) => Box::new(
            File::open(path)
                .map_err(|err| io_error(&format!("failed opening {}", path.display()), err))?,
        ),
    };

    let (segments, failure) = decode_all(input, config, schemas.as_ref());
    tracing::debug!(segments = segments.len(), "decoded response body");
    print_segments(&segments, format);

    match failure {
        Some(err) => Err(err),
        None => Ok(SUCCESS),
    }
}

/// Decode until EOF or the first bad segment. Segments before the failure are
/// still returned.
fn decode_all<R: Read>(
    input: R,
    config: FrameConfig,
    schemas: Option<&SchemaRegistry>,
) -> (Vec<Segment>, Option<CliError>) {
    let mut reader = SegmentReader::with_config(input, config);
    let mut segments = Vec::new();
    loop {
        let segment = match reader.try_read_segment() {
            Ok(Some(segment)) => segment,
            Ok(None) => return (segments, None),
            Err(err) => return (segments, Some(frame_error("decode failed", err))),
        };
        if let (Some(schemas), Segment::Payload { key, tag, body }) = (schemas, &segment) {
            if let Err(err) = schemas.validate(tag, body) {
                return (segments, Some(schema_error(&format!("pipe {key}"), err)));
            }
        }
        segments.push(segment);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use simplepipe_frame::PipeStatus;

    use super::*;
    use crate::exit::DATA_INVALID;

    #[test]
    fn decodes_mixed_body() {
        let body = br#"Ab12CdChat#9${"m":"x"}Ab12CdSPS#7${"s":2}Ab12Cdo"#;
        let (segments, failure) = decode_all(Cursor::new(&body[..]), FrameConfig::default(), None);
        assert!(failure.is_none());
        assert_eq!(segments.len(), 3);
        assert!(matches!(
            &segments[2],
            Segment::Status { status: PipeStatus::Ok, .. }
        ));
    }

    #[test]
    fn truncated_body_keeps_prefix_and_fails() {
        let body = b"Ab12CdoAb12CdChat#9$abc";
        let (segments, failure) = decode_all(Cursor::new(&body[..]), FrameConfig::default(), None);
        assert_eq!(segments.len(), 1);
        assert_eq!(failure.unwrap().code, DATA_INVALID);
    }

    #[test]
    fn continue_requires_opt_in() {
        let body = b"Ab12Cde";
        let (_, failure) = decode_all(Cursor::new(&body[..]), FrameConfig::default(), None);
        assert!(failure.is_some());

        let config = FrameConfig {
            continue_supported: true,
            ..FrameConfig::default()
        };
        let (segments, failure) = decode_all(Cursor::new(&body[..]), config, None);
        assert!(failure.is_none());
        assert_eq!(
            segments,
            vec![Segment::status("Ab12Cd".parse().unwrap(), PipeStatus::Continue)]
        );
    }

    #[test]
    fn schema_rejects_body() {
        let schemas =
            SchemaRegistry::from_embedded(&[("Chat", r#"{"type":"object","required":["m"]}"#)])
                .unwrap();
        let body = b"Ab12CdChat#2${}";
        let (segments, failure) =
            decode_all(Cursor::new(&body[..]), FrameConfig::default(), Some(&schemas));
        assert!(segments.is_empty());
        assert_eq!(failure.unwrap().code, DATA_INVALID);
    }
}
