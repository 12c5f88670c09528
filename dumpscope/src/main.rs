//! # dumpscope - Demo Host
//!
//! Runs a synthetic workload with the probes wired in, enables the commands
//! given with `--trace`, and performs the dump requests read from stdin until
//! Ctrl+C or `--duration` expires.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver};
use log::{debug, info};
use std::fs::File;
use std::io::{BufRead, BufWriter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dumpscope::cli::{split_agent_args, split_command_line, Args};
use dumpscope::context::AgentContext;
use dumpscope::domain::{ConfigError, Handle};
use dumpscope::export::SnapshotExporter;
use dumpscope::trackers::ChangeKind;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            if code != EXIT_USAGE {
                eprintln!("error: {e:#}");
            }
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ConfigError>().is_some() {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let context = Arc::new(AgentContext::default());

    if args.list {
        context.print_commands();
        return Ok(());
    }

    let mut groups: Vec<(String, String)> = args
        .traces
        .iter()
        .map(|line| {
            let (command, options) = split_command_line(line);
            (command.to_string(), options.to_string())
        })
        .collect();
    if let Some(ref agent_args) = args.agent_args {
        match split_agent_args(agent_args, |word| word == "help" || context.command(word).is_some()) {
            Ok(parsed) => groups.extend(parsed),
            Err(e) => {
                eprintln!("{e}");
                context.print_commands();
                return Err(e.into());
            }
        }
    }

    for (command, options) in &groups {
        if command == "help" {
            context.print_commands();
            return Ok(());
        }
        if let Err(e) = context.configure(command, options) {
            eprintln!("{e}");
            context.print_commands();
            return Err(e.into());
        }
    }
    context.check_commands()?;
    context.start();

    if !args.quiet {
        let enabled: Vec<&str> = groups.iter().map(|(command, _)| command.as_str()).collect();
        eprintln!("tracing: {}", if enabled.is_empty() { "nothing".to_string() } else { enabled.join(" ") });
        eprintln!("dumps: {} (one request per line on stdin)", context.dump_names().join(", "));
    }

    let stop = Arc::new(AtomicBool::new(false));
    let workload = {
        let context = Arc::clone(&context);
        let stop = Arc::clone(&stop);
        let step = Duration::from_millis(args.step_ms);
        std::thread::Builder::new()
            .name("workload".to_string())
            .spawn(move || run_workload(&context, &stop, step))
            .context("Failed to start workload thread")?
    };
    let requests = spawn_request_reader().context("Failed to start stdin reader")?;

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let started = Instant::now();
    let duration_limit = if args.duration > 0 { Some(Duration::from_secs(args.duration)) } else { None };
    let mut exit_reason = "interrupted";
    let mut dump_count = 0usize;

    loop {
        if let Some(limit) = duration_limit {
            if started.elapsed() >= limit {
                exit_reason = "duration limit reached";
                break;
            }
        }

        while let Ok(request) = requests.try_recv() {
            let request = request.trim();
            if request.is_empty() {
                continue;
            }
            debug!("dump request '{request}'");
            if context.perform_dump(request) {
                dump_count += 1;
            }
        }

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = &mut ctrl_c => {
                break;
            }
        }
    }

    stop.store(true, Ordering::Relaxed);
    workload.join().ok();

    if !args.quiet {
        let snapshot = context.allocations().snapshot();
        eprintln!(
            "\n{exit_reason}: {:.1}s, {dump_count} dumps, {} live allocations ({} bytes), {} open files",
            started.elapsed().as_secs_f64(),
            snapshot.len(),
            snapshot.total_size(),
            context.open_files().snapshot().len(),
        );
    }

    if let Some(ref export_path) = args.export {
        let file = File::create(export_path).context("Failed to create snapshot output file")?;
        SnapshotExporter::new()
            .pretty(true)
            .export(&context.allocations().snapshot(), BufWriter::new(file))
            .context("Failed to export snapshot")?;

        if !args.quiet {
            println!("saved: {}", export_path.display());
        }
    }

    Ok(())
}

/// Forward stdin lines as dump requests.
fn spawn_request_reader() -> std::io::Result<Receiver<String>> {
    let (tx, rx) = bounded(1000);
    std::thread::Builder::new().name("request reader".to_string()).spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    })?;
    Ok(rx)
}

/// Synthetic application: buffers that are allocated, resized and mostly
/// freed again, a rotating set of open files and request logging.
fn run_workload(context: &AgentContext, stop: &AtomicBool, step: Duration) {
    let allocations = context.allocations();
    let files = context.open_files();
    let generic = context.generic();
    let changes = context.changes();

    let mut next_address = 0x10_0000u64;
    let mut next_fd = 3u64;
    let mut live: Vec<(Handle, u64)> = Vec::new();
    let mut open: Vec<Handle> = Vec::new();
    let mut iteration = 0u64;

    changes.log_key(ChangeKind::Locale, "FORMAT");
    changes.log_new_value(ChangeKind::Locale, Some("German (Germany)"));
    changes.log_change(ChangeKind::Locale, Some("English (United States)"));

    while !stop.load(Ordering::Relaxed) {
        iteration += 1;

        // malloc
        let size = 64 + (iteration * 97) % 4096;
        allocations.log_size(size);
        let buffer = allocations.log_result(Handle(next_address));
        next_address += 0x1000;
        live.push((buffer, size));

        // realloc every third buffer to twice its size
        if iteration % 3 == 0 {
            if let Some((old, old_size)) = live.pop() {
                allocations.log_size(old_size * 2);
                allocations.log_ptr(old);
                let grown = allocations.log_result(Handle(next_address));
                next_address += 0x1000;
                live.push((grown, old_size * 2));
            }
        }

        // free most buffers, leak one in eight
        if iteration % 8 != 0 && live.len() > 1 {
            let (freed, _) = live.remove(0);
            allocations.log_free(freed);
        }

        // rotate open files
        files.log_path(&format!("/var/lib/app/segment-{}.dat", iteration % 16));
        if iteration % 4 == 0 {
            files.log_mode("rw");
        }
        open.push(files.log_opened(Handle(next_fd)));
        next_fd += 1;
        if open.len() > 8 {
            let closed = open.remove(0);
            debug!("closed {}", files.log_closed(closed));
        }

        // request log
        generic.log(1, format!("/api/items/{}", iteration % 32));
        #[allow(clippy::cast_possible_wrap)]
        generic.log_last(1, (iteration % 250) as i64);

        std::thread::sleep(step);
    }

    info!("workload stopped after {iteration} iterations");
}
