use std::{collections::BTreeMap, fmt, io, sync::Arc};

use log::info;

use crate::{
    address_space::{AddressSpace, PagingStrategy},
    error::VmError,
    process::{self, ProcessImage},
    section::Program,
    vmm::VirtualMemoryManager,
};

pub struct REPL {}

impl REPL {
    /// Next trimmed line from stdin, `None` at end of input.
    pub fn read_line(&self) -> Result<Option<String>, io::Error> {
        let mut buffer = String::new();
        let stdin = std::io::stdin();
        if stdin.read_line(&mut buffer)? == 0 {
            return Ok(None);
        }
        Ok(Some(buffer.trim().to_string()))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Statement {
    Exec {
        name: String,
        code_pages: usize,
        data_pages: usize,
        args: Vec<String>,
    },
    Read {
        pid: u32,
        vaddr: usize,
        len: usize,
    },
    Write {
        pid: u32,
        vaddr: usize,
        byte: u8,
        len: usize,
    },
    Exit {
        pid: u32,
    },
}

#[derive(Debug, PartialEq, Eq)]
pub enum PrepareError {
    UnrecognizedStatement(String),
    SyntaxError(String),
}

impl fmt::Display for PrepareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrepareError::UnrecognizedStatement(word) => {
                write!(f, "unrecognized keyword at start of '{}'", word)
            }
            PrepareError::SyntaxError(usage) => write!(f, "syntax error, usage: {}", usage),
        }
    }
}

/// Largest section a synthetic program may ask for, in pages.
pub const MAX_SECTION_PAGES: usize = 1 << 12;
/// Largest `read` or `write` transfer, in bytes.
pub const MAX_TRANSFER_LEN: usize = 1 << 20;

fn parse_number(word: Option<&str>, usage: &str) -> Result<usize, PrepareError> {
    let word = word.ok_or_else(|| PrepareError::SyntaxError(usage.to_string()))?;
    let parsed = match word.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => word.parse(),
    };
    parsed.map_err(|_| PrepareError::SyntaxError(usage.to_string()))
}

fn parse_bounded(word: Option<&str>, max: usize, usage: &str) -> Result<usize, PrepareError> {
    match parse_number(word, usage)? {
        n if n <= max => Ok(n),
        _ => Err(PrepareError::SyntaxError(format!("{} (at most {})", usage, max))),
    }
}

pub fn prepare_statement(input: &str) -> Result<Statement, PrepareError> {
    let mut words = input.split_whitespace();
    match words.next() {
        Some("exec") => {
            const USAGE: &str = "exec <name> <code-pages> <data-pages> [args..]";
            let name = words
                .next()
                .ok_or_else(|| PrepareError::SyntaxError(USAGE.to_string()))?
                .to_string();
            let code_pages = parse_bounded(words.next(), MAX_SECTION_PAGES, USAGE)?;
            let data_pages = parse_bounded(words.next(), MAX_SECTION_PAGES, USAGE)?;
            Ok(Statement::Exec {
                name,
                code_pages,
                data_pages,
                args: words.map(String::from).collect(),
            })
        }
        Some("read") => {
            const USAGE: &str = "read <pid> <vaddr> <len>";
            Ok(Statement::Read {
                pid: parse_number(words.next(), USAGE)? as u32,
                vaddr: parse_number(words.next(), USAGE)?,
                len: parse_bounded(words.next(), MAX_TRANSFER_LEN, USAGE)?,
            })
        }
        Some("write") => {
            const USAGE: &str = "write <pid> <vaddr> <byte> <len>";
            let pid = parse_number(words.next(), USAGE)? as u32;
            let vaddr = parse_number(words.next(), USAGE)?;
            let byte = u8::try_from(parse_number(words.next(), USAGE)?)
                .map_err(|_| PrepareError::SyntaxError(USAGE.to_string()))?;
            let len = parse_bounded(words.next(), MAX_TRANSFER_LEN, USAGE)?;
            Ok(Statement::Write {
                pid,
                vaddr,
                byte,
                len,
            })
        }
        Some("exit") => Ok(Statement::Exit {
            pid: parse_number(words.next(), "exit <pid>")? as u32,
        }),
        _ => Err(PrepareError::UnrecognizedStatement(input.to_string())),
    }
}

struct Process<const PAGE_SIZE: usize> {
    name: String,
    space: AddressSpace<PAGE_SIZE>,
    image: ProcessImage,
}

/// The processes started from the prompt.
pub struct Session<const PAGE_SIZE: usize> {
    vmm: Arc<VirtualMemoryManager<PAGE_SIZE>>,
    processes: BTreeMap<u32, Process<PAGE_SIZE>>,
    next_pid: u32,
}

impl<const PAGE_SIZE: usize> Session<PAGE_SIZE> {
    pub fn new(vmm: Arc<VirtualMemoryManager<PAGE_SIZE>>) -> Self {
        Self {
            vmm,
            processes: BTreeMap::new(),
            next_pid: 1,
        }
    }

    pub fn vmm(&self) -> &Arc<VirtualMemoryManager<PAGE_SIZE>> {
        &self.vmm
    }

    fn process(&self, pid: u32) -> Result<&Process<PAGE_SIZE>, VmError> {
        self.processes
            .get(&pid)
            .ok_or(VmError::UnknownAddressSpace)
    }

    pub fn execute(&mut self, statement: Statement) -> Result<String, VmError> {
        match statement {
            Statement::Exec {
                name,
                code_pages,
                data_pages,
                args,
            } => {
                let program = Arc::new(Program::<PAGE_SIZE>::synthetic(code_pages, data_pages));
                let mut argv = vec![name.as_str()];
                argv.extend(args.iter().map(String::as_str));
                let (space, image) =
                    process::load(&self.vmm, program, &argv, PagingStrategy::Demand)?;

                let pid = self.next_pid;
                self.next_pid += 1;
                let loaded_args = process::read_arguments(&space, image.argv, image.argc);
                info!("Started {} as pid {}", name, pid);
                let output = format!(
                    "pid {}: {} pages, pc {:#x}, sp {:#x}, argv {:?}",
                    pid, image.num_pages, image.initial_pc, image.initial_sp, loaded_args
                );
                self.processes.insert(pid, Process { name, space, image });
                Ok(output)
            }
            Statement::Read { pid, vaddr, len } => {
                let process = self.process(pid)?;
                let mut buf = vec![0; len];
                let transfer = process.space.read_bytes(vaddr, &mut buf);
                let bytes: Vec<String> = buf[..transfer.bytes]
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect();
                Ok(describe(transfer.bytes, len, &transfer.stopped, &bytes.join(" ")))
            }
            Statement::Write {
                pid,
                vaddr,
                byte,
                len,
            } => {
                let process = self.process(pid)?;
                let transfer = process.space.write_bytes(vaddr, &vec![byte; len]);
                Ok(describe(transfer.bytes, len, &transfer.stopped, ""))
            }
            Statement::Exit { pid } => {
                let process = self
                    .processes
                    .remove(&pid)
                    .ok_or(VmError::UnknownAddressSpace)?;
                process.space.destroy()?;
                Ok(format!(
                    "pid {} ({}) exited, {} pages released",
                    pid, process.name, process.image.num_pages
                ))
            }
        }
    }

    /// Destroys every remaining process.
    pub fn close(&mut self) -> Result<(), VmError> {
        while let Some((_, process)) = self.processes.pop_first() {
            process.space.destroy()?;
        }
        Ok(())
    }
}

fn describe(done: usize, wanted: usize, stopped: &Option<VmError>, bytes: &str) -> String {
    let mut line = format!("{} of {} bytes", done, wanted);
    if let Some(e) = stopped {
        line.push_str(&format!(" (stopped: {})", e));
    }
    if !bytes.is_empty() {
        line.push_str(": ");
        line.push_str(bytes);
    }
    line
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;
    use crate::config::VmConfig;

    #[test]
    fn prepare_statements() {
        assert_eq!(
            prepare_statement("exec shell 2 1 -v now"),
            Ok(Statement::Exec {
                name: String::from("shell"),
                code_pages: 2,
                data_pages: 1,
                args: vec![String::from("-v"), String::from("now")],
            })
        );
        assert_eq!(
            prepare_statement("write 1 0x400 0xAA 16"),
            Ok(Statement::Write {
                pid: 1,
                vaddr: 0x400,
                byte: 0xAA,
                len: 16
            })
        );
        assert_eq!(
            prepare_statement("read 2 10 4"),
            Ok(Statement::Read {
                pid: 2,
                vaddr: 10,
                len: 4
            })
        );
        assert_eq!(prepare_statement("exit 3"), Ok(Statement::Exit { pid: 3 }));
    }

    #[test]
    fn reject_bad_statements() {
        assert!(matches!(
            prepare_statement("select * from t"),
            Err(PrepareError::UnrecognizedStatement(_))
        ));
        assert!(matches!(
            prepare_statement("write 1 0 256 1"),
            Err(PrepareError::SyntaxError(_))
        ));
        assert!(matches!(
            prepare_statement("read 1"),
            Err(PrepareError::SyntaxError(_))
        ));
    }

    #[test]
    fn oversized_requests_are_syntax_errors() {
        for input in [
            "exec p 0xffffffffffffffff 0",
            "exec p 1 4097",
            "read 1 0 0xffffffffffffffff",
            "write 1 0 1 2000000",
        ] {
            assert!(
                matches!(prepare_statement(input), Err(PrepareError::SyntaxError(_))),
                "{}",
                input
            );
        }
        assert!(prepare_statement("exec p 4096 0").is_ok());
        assert!(prepare_statement("read 1 0 1048576").is_ok());
    }

    #[test]
    #[serial]
    fn session_runs_a_process() {
        let _ = env_logger::builder().is_test(true).try_init();
        let vmm = VirtualMemoryManager::<64>::init(
            VmConfig::default().frames(4).swap_file("repl_session"),
        )
        .unwrap();
        let mut session = Session::new(vmm.clone());

        let started = session
            .execute(prepare_statement("exec prog 1 1 hello").unwrap())
            .unwrap();
        assert!(started.starts_with("pid 1:"));
        assert!(started.contains("[\"prog\", \"hello\"]"));

        let wrote = session
            .execute(prepare_statement("write 1 64 0xbb 2").unwrap())
            .unwrap();
        assert_eq!(wrote, "2 of 2 bytes");
        let read = session
            .execute(prepare_statement("read 1 64 2").unwrap())
            .unwrap();
        assert_eq!(read, "2 of 2 bytes: bb bb");

        let refused = session
            .execute(prepare_statement("write 1 0 1 1").unwrap())
            .unwrap();
        assert!(refused.starts_with("0 of 1 bytes (stopped:"));

        session
            .execute(prepare_statement("exit 1").unwrap())
            .unwrap();
        assert_eq!(vmm.free_frames(), 4);
        assert!(session
            .execute(prepare_statement("read 1 0 1").unwrap())
            .is_err());

        session.close().unwrap();
        vmm.shutdown().unwrap();
    }
}
