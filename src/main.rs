use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use colored::Colorize;
use miette::{IntoDiagnostic, Result};

use ccvm::{assemble, Image, RunState};

/// ccvm is an assembler and bytecode interpreter toolchain for the CC
/// virtual machine.
#[derive(Parser)]
struct Args {
    /// `.cca` file to assemble or `.ccb` image to execute
    path: Option<PathBuf>,

    /// Print the version banner and exit
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Dump stack, registers, memory and flags after a run
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    use MsgColor::*;
    let args = Args::parse();

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .context_lines(ccvm::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    if args.version {
        banner();
        return Ok(());
    }

    let Some(path) = args.path else {
        banner();
        return Ok(());
    };

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("cca" | "CCA") => {
            file_message(Green, "Assembling", &path);
            let src = fs::read_to_string(&path).into_diagnostic()?;
            let image = assemble(&src)?;

            let out = path.with_extension("ccb");
            fs::write(&out, image.to_bytes()).into_diagnostic()?;

            message(Green, "Finished", "emit binary");
            file_message(Green, "Saved", &out);
        }
        Some("ccb" | "CCB") => {
            file_message(Green, "Running", &path);
            let raw = fs::read(&path).into_diagnostic()?;
            let image = Image::parse(&raw)?;

            let mut vm = RunState::try_from(image)?;
            let outcome = vm.run();
            if args.debug {
                vm.dump();
            }
            outcome?;

            file_message(Green, "Completed", &path);
        }
        _ => {
            // Unknown extensions are reported without a failing exit code
            message(Red, "Error", "file has unknown extension (expected .cca or .ccb)");
        }
    }
    Ok(())
}

#[allow(unused)]
enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &Path) {
    let right = format!("target {}", right.display());
    message(color, left, &right);
}

fn message<S>(color: MsgColor, left: S, right: S)
where
    S: Colorize + std::fmt::Display,
{
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    println!("{left:>12} {right}");
}

fn banner() {
    println!("\n~ ccvm v{VERSION} ~");
    println!("{SHORT_INFO}");
}

const SHORT_INFO: &str = r"
Welcome to ccvm, an all-in-one toolchain for assembling and running
CC virtual machine programs. Pass a `.cca` file to assemble it into a
`.ccb` image, or a `.ccb` image to execute it. Use `-h` or `--help`
to access the usage instructions and documentation.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
