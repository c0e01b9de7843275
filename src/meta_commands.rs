use std::fmt::Write;

use crate::vmm::VirtualMemoryManager;

#[derive(Debug, PartialEq, Eq)]
pub enum MetaCommand {
    Exit,
    Stats,
    Frames,
}

#[derive(Debug, PartialEq, Eq)]
pub enum MetaCommandError {
    UnrecognizedCommand,
}

pub fn parse_meta_command(input: &str) -> Result<MetaCommand, MetaCommandError> {
    match input {
        ".exit" => Ok(MetaCommand::Exit),
        ".stats" => Ok(MetaCommand::Stats),
        ".frames" => Ok(MetaCommand::Frames),
        _ => Err(MetaCommandError::UnrecognizedCommand),
    }
}

/// One line per frame: its number and the page it holds.
pub fn frames_report<const PAGE_SIZE: usize>(vmm: &VirtualMemoryManager<PAGE_SIZE>) -> String {
    let mut report = String::new();
    for (frame, owner) in vmm.frame_owners().into_iter().enumerate() {
        let _ = match owner {
            Some(page) => writeln!(report, "frame {:>3}: space {} vpn {}", frame, page.space, page.vpn),
            None => writeln!(report, "frame {:>3}: free", frame),
        };
    }
    let _ = write!(
        report,
        "{} of {} frames free",
        vmm.free_frames(),
        vmm.num_frames()
    );
    report
}
