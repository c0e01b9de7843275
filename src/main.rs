use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser;
use vm_kernel::{
    meta_commands::{frames_report, parse_meta_command, MetaCommand, MetaCommandError},
    repl::{prepare_statement, Session, REPL},
    VirtualMemoryManager, VmConfig, PAGE_SIZE,
};

/// Interactive driver for the demand-paged virtual memory manager
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of physical frames
    #[arg(long, default_value_t = 16)]
    frames: usize,

    /// Name of the swap file, removed on exit
    #[arg(long, default_value = "swapFile")]
    swap_file: String,

    /// Keep paging events in memory and print them after every command
    #[arg(long)]
    trace_events: bool,
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let config = VmConfig::default()
        .frames(args.frames)
        .swap_file(&args.swap_file)
        .record_events(args.trace_events);
    let vmm = VirtualMemoryManager::<PAGE_SIZE>::init(config)
        .context("Failed to start virtual memory")?;
    let mut session = Session::new(vmm.clone());
    let repl = REPL {};

    println!("---- {} frames of {} bytes ----", args.frames, PAGE_SIZE);
    loop {
        print!("vm > ");
        io::stdout().flush()?;
        let input = match repl.read_line()? {
            Some(input) => input,
            None => break,
        };
        if input.is_empty() {
            continue;
        }

        if input.starts_with('.') {
            match parse_meta_command(&input) {
                Ok(MetaCommand::Exit) => break,
                Ok(MetaCommand::Stats) => println!("{}", vmm.stats()),
                Ok(MetaCommand::Frames) => println!("{}", frames_report(&*vmm)),
                Err(MetaCommandError::UnrecognizedCommand) => {
                    println!("Unrecognized command '{}'", input)
                }
            }
            continue;
        }

        match prepare_statement(&input) {
            Ok(statement) => match session.execute(statement) {
                Ok(output) => println!("{}", output),
                Err(e) => println!("Error: {}", e),
            },
            Err(e) => println!("{}", e),
        }
        for event in vmm.events().drain() {
            println!("  {}", event);
        }
    }

    session.close().context("Failed to tear down processes")?;
    vmm.shutdown().context("Failed to remove the swap file")?;
    println!("---- System closed ----");
    Ok(())
}
