use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use simplepipe_frame::PipeKey;

use crate::cmd::KeygenArgs;
use crate::exit::{CliError, CliResult, SUCCESS, USAGE};
use crate::output::{new_table, print_json, OutputFormat, SCHEMA_BASE};

#[derive(Serialize)]
struct KeygenOutput {
    schema_id: String,
    keys: Vec<PipeKey>,
}

pub fn run(args: KeygenArgs, format: OutputFormat) -> CliResult<i32> {
    if args.count == 0 {
        return Err(CliError::new(USAGE, "--count must be at least 1"));
    }
    let keys = generate(args.count, args.seed);

    match format {
        OutputFormat::Json => print_json(&KeygenOutput {
            schema_id: format!("{SCHEMA_BASE}/keygen.schema.json"),
            keys,
        }),
        OutputFormat::Table => {
            let mut table = new_table(vec!["#", "KEY"]);
            for (i, key) in keys.iter().enumerate() {
                table.add_row(vec![i.to_string(), key.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for key in keys {
                println!("{key}");
            }
        }
    }
    Ok(SUCCESS)
}

fn generate(count: usize, seed: Option<u64>) -> Vec<PipeKey> {
    match seed {
        Some(seed) => {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..count).map(|_| PipeKey::generate_with(&mut rng)).collect()
        }
        None => (0..count).map(|_| PipeKey::generate()).collect(),
    }
}
