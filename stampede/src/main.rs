mod cli;
mod exit_codes;
mod iteration;
mod output;
mod plan;
mod run;

use clap::Parser;
use mimalloc::MiMalloc;

use exit_codes::ExitCode;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    let cli = match cli::Cli::try_parse() {
        Ok(v) => v,
        Err(err) => {
            use clap::error::ErrorKind;
            let _ = err.print();
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::Success.as_i32(),
                _ => ExitCode::InvalidInput.as_i32(),
            };
            std::process::exit(code);
        }
    };

    let code = match cli.command {
        cli::Command::Run(args) => match run::run(args).await {
            Ok(code) => code.as_i32(),
            Err(err) => {
                eprintln!("{err:#}");
                exit_code_for(&err).as_i32()
            }
        },
    };

    std::process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    if let Some(core) = err.downcast_ref::<stampede_core::runner::Error>() {
        return match core {
            stampede_core::runner::Error::Join(_) => ExitCode::RuntimeError,
            _ => ExitCode::InvalidInput,
        };
    }

    if err.downcast_ref::<serde_yaml::Error>().is_some() {
        return ExitCode::InvalidInput;
    }

    ExitCode::RuntimeError
}
