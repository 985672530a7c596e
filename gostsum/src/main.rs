use gosthash2012::{Digest, State};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::exit;
use structopt::StructOpt;

mod check;
mod dispatch;
mod task;

use check::CheckError;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "gostsum",
    about = "Calculates GOST R 34.11-2012 (Streebog) message digests",
    setting = structopt::clap::AppSettings::DisableVersion
)]
struct Opt {
    #[structopt(parse(from_os_str), default_value = "-")]
    /// Any number of filepaths, or - for standard input.
    input: Vec<PathBuf>,

    #[structopt(short = "c", long = "check", parse(from_os_str))]
    /// Check message digests read from the given manifest file instead of
    /// generating them.
    check: Option<PathBuf>,

    #[structopt(short = "v", long = "verbose")]
    /// Print a status line per manifest entry while checking, or the file
    /// name next to each generated digest.
    verbose: bool,

    #[structopt(short = "l", long = "long")]
    /// Use the 512 bit digest. The default is 256 bit.
    long: bool,

    #[structopt(short = "n", long = "no-async")]
    /// Validate manifest entries on the main thread only.
    no_async: bool,

    #[structopt(short = "V", long = "statistics")]
    /// Report per-worker statistics on stderr after a check run.
    statistics: bool,
}

enum Input {
    Stdin,
    File(File),
}

fn open_input(path: &Path) -> io::Result<Input> {
    Ok(if path == Path::new("-") {
        Input::Stdin
    } else {
        Input::File(File::open(path)?)
    })
}

fn hash_one(input: Input, state: &mut State, buf: &mut [u8]) -> io::Result<Digest> {
    state.reset();
    match input {
        Input::Stdin => {
            let stdin = io::stdin();
            task::hash_reader(state, stdin.lock(), buf)
        }
        Input::File(file) => task::hash_reader(state, file, buf),
    }
}

fn generate(opt: &Opt) -> i32 {
    let mut state = if opt.long {
        State::new512()
    } else {
        State::new256()
    };
    let mut buf = [0; task::READ_BUF_SIZE];
    let mut code = 0;
    for path in &opt.input {
        match open_input(path).and_then(|input| hash_one(input, &mut state, &mut buf)) {
            Ok(digest) => {
                if opt.verbose {
                    println!("{} {}", digest.hex(), path.to_string_lossy());
                } else {
                    println!("{}", digest.hex());
                }
            }
            Err(err) => {
                eprintln!("gostsum: {}: {}", path.to_string_lossy(), err);
                code = 4;
            }
        }
    }
    code
}

fn run_check(opt: &Opt, manifest: &Path) -> i32 {
    let options = check::Options {
        verbose: opt.verbose,
        no_async: opt.no_async,
        statistics: opt.statistics,
    };
    match check::check(manifest, &options) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(CheckError::Format(line)) => {
            if opt.verbose {
                println!("improperly formated line {}", line);
            }
            2
        }
        Err(err @ CheckError::Memory) => {
            eprintln!("gostsum: {}: {}", manifest.to_string_lossy(), err);
            3
        }
        Err(err) => {
            eprintln!("gostsum: {}: {}", manifest.to_string_lossy(), err);
            4
        }
    }
}

fn main() {
    let opt = Opt::from_args();
    let code = match &opt.check {
        Some(manifest) => run_check(&opt, manifest),
        None => generate(&opt),
    };
    exit(code);
}
