//! Manifest parsing and the check-mode driver.
//!
//! A manifest row is `<hex digest><SP><filename><LF>`, where the digest is
//! 64 hex characters for a 256-bit entry or 128 for a 512-bit one; the row
//! itself decides the width. Small manifests are validated inline; larger
//! ones are spread over the dispatcher's worker pool.

use crate::dispatch::{worker_count, Dispatcher, WORKER_STACK_SIZE};
use crate::task::{result, Task, READ_BUF_SIZE};
use failure::Fail;
use gosthash2012::{OUTBYTES_256, OUTBYTES_512};
use std::fs::File;
use std::io;
use std::io::prelude::*;
use std::io::BufReader;
use std::path::Path;

/// Manifests smaller than this are validated inline on the main thread.
const MIN_ASYNC_MANIFEST_LEN: u64 = 4000;
/// Filename buffers start at this capacity and grow by the same step.
const FNAME_RESERVE: usize = 256;
/// Ceiling on a manifest filename, the platform path length limit.
const FNAME_MAX: usize = 4096;

#[derive(Debug, Fail)]
pub enum CheckError {
    /// A row that does not follow the manifest format, with its 1-based
    /// line number.
    #[fail(display = "improperly formated line {}", _0)]
    Format(u64),
    #[fail(display = "out of memory")]
    Memory,
    #[fail(display = "{}", _0)]
    Io(#[cause] io::Error),
    #[fail(display = "worker thread panicked")]
    Thread,
}

impl From<io::Error> for CheckError {
    fn from(err: io::Error) -> CheckError {
        CheckError::Io(err)
    }
}

pub struct Options {
    pub verbose: bool,
    pub no_async: bool,
    pub statistics: bool,
}

/// A streaming reader over the manifest, tracking the current line for
/// error reports.
pub struct Parser<R> {
    reader: R,
    line: u64,
}

impl<R: BufRead> Parser<R> {
    pub fn new(reader: R) -> Parser<R> {
        Parser { reader, line: 1 }
    }

    fn format_err(&self) -> CheckError {
        CheckError::Format(self.line)
    }

    /// True when the manifest ends cleanly at a row boundary.
    pub fn at_eof(&mut self) -> Result<bool, CheckError> {
        loop {
            match self.reader.fill_buf() {
                Ok(buf) => return Ok(buf.is_empty()),
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// The next raw byte; running out mid-row is a format error.
    fn next_byte(&mut self) -> Result<u8, CheckError> {
        let line = self.line;
        let byte = loop {
            match self.reader.fill_buf() {
                Ok(buf) => {
                    if buf.is_empty() {
                        return Err(CheckError::Format(line));
                    }
                    break buf[0];
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        };
        self.reader.consume(1);
        Ok(byte)
    }

    /// Read exactly `buf.len()` bytes; any shortfall is a format error.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<(), CheckError> {
        let line = self.line;
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => return Err(CheckError::Format(line)),
                Ok(n) => filled += n,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Read the filename up to LF into `name`, stripping one trailing CR.
    /// The buffer is lazily allocated and grows in fixed steps up to the
    /// path length ceiling.
    fn read_filename(&mut self, name: &mut Vec<u8>) -> Result<(), CheckError> {
        name.clear();
        if name.capacity() == 0 {
            name.try_reserve_exact(FNAME_RESERVE)
                .map_err(|_| CheckError::Memory)?;
        }
        loop {
            let byte = self.next_byte()?;
            if byte == b'\n' {
                break;
            }
            if name.len() == name.capacity() {
                if name.capacity() >= FNAME_MAX {
                    return Err(self.format_err());
                }
                name.try_reserve_exact(FNAME_RESERVE)
                    .map_err(|_| CheckError::Memory)?;
            }
            name.push(byte);
        }
        if name.last() == Some(&b'\r') {
            name.pop();
        }
        Ok(())
    }

    /// Parse one row into `task`. 64 hex characters followed by a space make
    /// a 256-bit row; otherwise the separator position must hold the 65th
    /// hex character of a 512-bit digest, and the space comes after the
    /// 128th.
    pub fn parse_row(&mut self, task: &mut Task) -> Result<(), CheckError> {
        let mut hexbuf = [0; 64];
        self.read_full(&mut hexbuf)?;
        task.set_expected(0, &hexbuf)
            .map_err(|_| self.format_err())?;

        let sep = self.next_byte()?;
        if sep == b' ' {
            task.set_digest_size(OUTBYTES_256);
        } else {
            let mut rest = [0; 64];
            rest[0] = sep;
            self.read_full(&mut rest[1..])?;
            task.set_expected(32, &rest)
                .map_err(|_| self.format_err())?;
            if self.next_byte()? != b' ' {
                return Err(self.format_err());
            }
            task.set_digest_size(OUTBYTES_512);
        }

        self.read_filename(task.filename_mut())?;
        self.line += 1;
        Ok(())
    }
}

/// Write one `<filename> - OK|ERROR` status line to stdout.
fn print_status(name: &[u8], code: u32) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let _ = out.write_all(name);
    let status: &[u8] = if code == result::MATCH {
        b" - OK\n"
    } else {
        b" - ERROR\n"
    };
    let _ = out.write_all(status);
}

/// Run check mode over `manifest`. `Ok(true)` means every row validated.
pub fn check(manifest: &Path, opts: &Options) -> Result<bool, CheckError> {
    let file = File::open(manifest)?;
    let len = file.metadata()?.len();
    let mut parser = Parser::new(BufReader::new(file));
    if opts.no_async || len < MIN_ASYNC_MANIFEST_LEN {
        check_sync(&mut parser, opts)
    } else {
        check_async(&mut parser, opts)
    }
}

fn check_sync<R: BufRead>(parser: &mut Parser<R>, opts: &Options) -> Result<bool, CheckError> {
    let mut task = Task::new();
    let mut buf = [0; READ_BUF_SIZE];
    let mut all_ok = true;
    while !parser.at_eof()? {
        parser.parse_row(&mut task)?;
        let outcome = task.validate(&mut buf);
        if opts.verbose {
            print_status(task.filename(), outcome);
        }
        if outcome != result::MATCH {
            all_ok = false;
        }
    }
    Ok(all_ok)
}

fn drive<R: BufRead>(
    parser: &mut Parser<R>,
    disp: &Dispatcher,
    report: &mut dyn FnMut(&Task, u32),
) -> Result<(), CheckError> {
    loop {
        if parser.at_eof()? {
            return Ok(());
        }
        let index = disp.find_free_slot(report);
        // Safety: find_free_slot returned a slot in the INIT state, which
        // this thread owns until it submits.
        let task = unsafe { disp.slot(index).task_mut() };
        parser.parse_row(task)?;
        disp.submit(index);
    }
}

fn check_async<R: BufRead>(parser: &mut Parser<R>, opts: &Options) -> Result<bool, CheckError> {
    let disp = Dispatcher::new();
    let workers = worker_count();
    let verbose = opts.verbose;
    let mut all_ok = true;

    let scope_result = crossbeam::thread::scope(|s| -> Result<(), CheckError> {
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let disp = &disp;
            let spawned = s
                .builder()
                .name(format!("worker{}", id))
                .stack_size(WORKER_STACK_SIZE)
                .spawn(move |_| disp.worker_loop());
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    // Shut down whatever did start before bailing out.
                    disp.shutdown();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(CheckError::Io(err));
                }
            }
        }

        let mut report = |task: &Task, code: u32| {
            if verbose {
                print_status(task.filename(), code);
            }
            if code != result::MATCH {
                all_ok = false;
            }
        };

        let driven = drive(parser, &disp, &mut report);

        // Stop the pool whether or not the manifest parsed to the end, then
        // report everything the workers finished after the last scan.
        disp.shutdown();
        let mut processed = Vec::with_capacity(workers);
        for handle in handles {
            match handle.join() {
                Ok(count) => processed.push(count),
                Err(_) => return Err(CheckError::Thread),
            }
        }
        disp.drain(&mut report);

        if opts.statistics {
            for (id, count) in processed.iter().enumerate() {
                eprintln!("gostsum: worker{}: {} line(s)", id, count);
            }
        }
        driven
    });

    match scope_result {
        Ok(Ok(())) => Ok(all_ok),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(CheckError::Thread),
    }
}
