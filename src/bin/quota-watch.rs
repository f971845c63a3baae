#![deny(unsafe_code)]

use std::io::{self, Write};
use std::{env, process::ExitCode};

fn main() -> ExitCode {
    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    run_with(env::args_os(), &mut stdout, &mut stderr)
}

fn run_with<I, Out, Err>(args: I, stdout: &mut Out, stderr: &mut Err) -> ExitCode
where
    I: IntoIterator,
    I::Item: Into<std::ffi::OsString> + Clone,
    Out: Write,
    Err: Write,
{
    let status = monitor_cli::run(args, stdout, stderr);
    monitor_cli::exit_code_from(status)
}
