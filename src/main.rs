use lox::reporter::CliReporter;
use lox::vm::{InterpretError, Vm};
use rustyline::Editor;
use std::{env, fs, io, process};

fn main() {
    let mut args = env::args().skip(1);
    match args.next() {
        None => repl(),
        Some(path) => {
            if args.next().is_some() {
                eprintln!("Usage: lox [path]");
                process::exit(exitcode::USAGE);
            }
            run_file(&path);
        }
    }
}

fn repl() {
    let mut rl = Editor::<()>::new();
    let mut out = io::stdout();
    let mut vm = Vm::new(&mut out);
    let mut reporter = CliReporter::new();

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                if line.is_empty() {
                    break;
                }
                rl.add_history_entry(&line);
                vm.interpret(&line, &mut reporter).ok();
            }
            Err(_) => {
                break;
            }
        }
    }
}

fn run_file(path: &str) {
    let source = fs::read_to_string(path).unwrap_or_else(|err| {
        eprintln!("Could not read file \"{}\": {}", path, err);
        process::exit(exitcode::IOERR);
    });

    let mut out = io::stdout();
    let mut vm = Vm::new(&mut out);
    let mut reporter = CliReporter::new();
    match vm.interpret(&source, &mut reporter) {
        Ok(()) => {}
        Err(InterpretError::Compile) => process::exit(exitcode::DATAERR),
        Err(InterpretError::Runtime) => process::exit(exitcode::SOFTWARE),
    }
}
