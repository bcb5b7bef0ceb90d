use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use simplepipe_frame::{write_json, PayloadRegistry, PipeEvent, PipeKey, PipeRequest};
use simplepipe_session::{
    HandlerTable, NoopHandler, PipeConfig, PipeError, PipeHandler, PipeServer, PipeSession,
    QueryDriver, QueryOutcome, SessionCodec, SessionRegistry, StopSignal,
};
use simplepipe_transport::{RequestTransport, TransportError};
use tracing::{debug, info, warn};

use crate::cmd::SimulateArgs;
use crate::exit::{pipe_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{new_table, print_json, OutputFormat, SCHEMA_BASE};

const TICK_TAG: &str = "Tick";

#[derive(Debug, Serialize, Deserialize)]
struct Tick {
    seq: u32,
}

impl PipeEvent for Tick {
    fn tag(&self) -> &str {
        TICK_TAG
    }

    fn encode_body(&self, dst: &mut BytesMut) -> simplepipe_frame::Result<()> {
        write_json(TICK_TAG, self, dst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Counts server-side closes.
struct ServerHooks {
    closed: Arc<AtomicUsize>,
}

impl PipeHandler for ServerHooks {
    fn on_closed(&self, _session: &PipeSession) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Hands request forms straight to an in-process server.
struct Loopback {
    server: PipeServer,
}

impl RequestTransport for Loopback {
    fn request(&mut self, body: &[u8]) -> simplepipe_transport::Result<Bytes> {
        let form = std::str::from_utf8(body).map_err(|_| TransportError::Status(400))?;
        let request = PipeRequest::parse(form).map_err(|_| TransportError::Status(400))?;
        self.server
            .respond(&request)
            .map(|(_, body)| body)
            .map_err(|_| TransportError::Status(500))
    }
}

struct SimPipe {
    key: PipeKey,
    abandoned: bool,
    driver: QueryDriver<Loopback>,
    received: Arc<AtomicUsize>,
    pushed: u32,
    polls: usize,
    closed: bool,
}

#[derive(Serialize)]
struct PipeReport {
    key: PipeKey,
    abandoned: bool,
    pushed: u32,
    received: usize,
    polls: usize,
    registered: bool,
}

#[derive(Serialize)]
struct SimulateOutput {
    schema_id: String,
    elapsed_ms: u128,
    pipes: Vec<PipeReport>,
    closed_by_server: usize,
    remaining: usize,
    statistics: String,
}

pub fn run(args: SimulateArgs, format: OutputFormat) -> CliResult<i32> {
    let duration = parse_duration(&args.duration)?;
    if args.pipes + args.abandoned == 0 {
        return Err(CliError::new(USAGE, "nothing to simulate: no pipes requested"));
    }
    let config = match &args.config {
        Some(path) => PipeConfig::load(path).map_err(|err| pipe_error("bad --config", err))?,
        None => simulation_config(),
    };

    let stop = Arc::new(StopSignal::new());
    let on_interrupt = Arc::clone(&stop);
    if let Err(err) = ctrlc::set_handler(move || on_interrupt.stop()) {
        warn!(error = %err, "ctrl-c handler not installed");
    }

    let output = simulate(&args, config, duration, &stop)?;
    print_report(&output, format);
    Ok(SUCCESS)
}

/// Sub-second timings so pipes are reaped within a short run.
fn simulation_config() -> PipeConfig {
    PipeConfig {
        notify_interval: Duration::from_millis(100),
        monitoring_interval: Duration::from_millis(50),
        wait_closing: Duration::from_millis(100),
        destroy_poll_timeout: Duration::from_millis(100),
        query_interval: Duration::from_millis(20),
        ..PipeConfig::default()
    }
}

fn simulate(
    args: &SimulateArgs,
    config: PipeConfig,
    duration: Duration,
    stop: &StopSignal,
) -> CliResult<SimulateOutput> {
    let started = Instant::now();
    let server = PipeServer::new(SessionRegistry::new(config.clone()));
    let client_registry = SessionRegistry::new(PipeConfig {
        background_reaper: false,
        ..config.clone()
    });
    let mut payloads = PayloadRegistry::new();
    payloads
        .register_json::<Tick>(TICK_TAG)
        .map_err(|err| CliError::new(USAGE, err.to_string()))?;
    let codec = SessionCodec::new(client_registry.clone(), Arc::new(payloads));
    let closed = Arc::new(AtomicUsize::new(0));

    let mut pipes = Vec::with_capacity(args.pipes + args.abandoned);
    for index in 0..args.pipes + args.abandoned {
        let producer = Arc::new(PipeSession::new(Arc::new(ServerHooks {
            closed: Arc::clone(&closed),
        })));
        let key = server
            .registry()
            .setup(&producer)
            .map_err(|err| pipe_error("pipe setup failed", err))?;

        let received = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&received);
        let handlers = HandlerTable::new().on::<Tick, _>(move |_, _| {
            counter.fetch_add(1, Ordering::Relaxed);
            true
        });
        let consumer = Arc::new(
            PipeSession::new(Arc::new(NoopHandler))
                .with_handlers(handlers)
                .unmanaged(),
        );
        client_registry.register_external(key, &consumer);
        client_registry.notify_status(&key, true);

        let transport = Loopback {
            server: server.clone(),
        };
        pipes.push(SimPipe {
            key,
            abandoned: index >= args.pipes,
            driver: QueryDriver::new(codec.clone(), consumer, transport),
            received,
            pushed: 0,
            polls: 0,
            closed: false,
        });
    }
    info!(
        pipes = args.pipes,
        abandoned = args.abandoned,
        messages = args.messages,
        "simulation started"
    );

    let deadline = started + duration;
    while Instant::now() < deadline {
        for pipe in &mut pipes {
            produce(server.registry(), pipe, args.messages)?;
            consume(pipe)?;
        }
        if stop.wait(config.query_interval) {
            info!("simulation interrupted");
            break;
        }
    }

    let statistics = server.registry().statistics();
    let reports = pipes
        .iter()
        .map(|pipe| PipeReport {
            key: pipe.key,
            abandoned: pipe.abandoned,
            pushed: pipe.pushed,
            received: pipe.received.load(Ordering::Relaxed),
            polls: pipe.polls,
            registered: server.registry().lookup(&pipe.key).is_some(),
        })
        .collect();
    let remaining = server.registry().len();
    server.registry().shutdown();

    Ok(SimulateOutput {
        schema_id: format!("{SCHEMA_BASE}/simulate.schema.json"),
        elapsed_ms: started.elapsed().as_millis(),
        pipes: reports,
        closed_by_server: closed.load(Ordering::Relaxed),
        remaining,
        statistics,
    })
}

/// Push the next event while the pipe is still registered.
fn produce(registry: &SessionRegistry, pipe: &mut SimPipe, messages: u32) -> CliResult<()> {
    if pipe.pushed >= messages {
        return Ok(());
    }
    let batch: Vec<Arc<dyn PipeEvent>> = vec![Arc::new(Tick { seq: pipe.pushed })];
    match registry.pipe_in(&pipe.key, &batch) {
        Ok(_) => pipe.pushed += 1,
        // Reaped since the last round.
        Err(PipeError::UnknownKey(_)) => {}
        Err(err) => return Err(pipe_error("pipe in failed", err)),
    }
    Ok(())
}

/// Poll once, unless the consumer went away or its pipe is closed.
fn consume(pipe: &mut SimPipe) -> CliResult<()> {
    if pipe.closed || (pipe.abandoned && pipe.polls > 0) {
        return Ok(());
    }
    pipe.polls += 1;
    match pipe
        .driver
        .poll_at(Instant::now())
        .map_err(|err| pipe_error("query failed", err))?
    {
        QueryOutcome::Closed => {
            debug!(key = %pipe.key, "consumer saw pipe close");
            pipe.closed = true;
        }
        QueryOutcome::Failed(retries) => debug!(key = %pipe.key, retries, "query failed"),
        QueryOutcome::Delivered(_) | QueryOutcome::Idle => {}
    }
    Ok(())
}

fn print_report(output: &SimulateOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table => {
            let mut table = new_table(vec!["KEY", "ROLE", "PUSHED", "RECEIVED", "POLLS", "STATE"]);
            for pipe in &output.pipes {
                table.add_row(vec![
                    pipe.key.to_string(),
                    role(pipe).to_string(),
                    pipe.pushed.to_string(),
                    pipe.received.to_string(),
                    pipe.polls.to_string(),
                    state(pipe).to_string(),
                ]);
            }
            println!("{table}");
            println!(
                "closed by server: {}, remaining: {}",
                output.closed_by_server, output.remaining
            );
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for pipe in &output.pipes {
                println!(
                    "pipe {} ({}): pushed {}, received {}, {}",
                    pipe.key,
                    role(pipe),
                    pipe.pushed,
                    pipe.received,
                    state(pipe)
                );
            }
            print!("{}", output.statistics);
        }
    }
}

fn role(pipe: &PipeReport) -> &'static str {
    if pipe.abandoned {
        "abandoned"
    } else {
        "polling"
    }
}

fn state(pipe: &PipeReport) -> &'static str {
    if pipe.registered {
        "registered"
    } else {
        "reaped"
    }
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    let (number, millis) = match input.strip_suffix("ms") {
        Some(num) => (num, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input:?}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }
    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
