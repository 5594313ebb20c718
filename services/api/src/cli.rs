use crate::demo::{run_demo, DemoArgs};
use crate::server;
use clap::{Args, Parser, Subcommand, ValueEnum};
use hireflow::error::AppError;
use hireflow::workflows;

#[derive(Parser, Debug)]
#[command(
    name = "Hireflow",
    about = "Run the hiring workflow service or inspect its state machines from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Print the registered state machines
    Machines(MachinesArgs),
    /// Walk a candidate from requisition to verified hire against an in-memory store
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

#[derive(Args, Debug)]
pub(crate) struct MachinesArgs {
    /// Only print the named machine (e.g. `offer`, `everify_case`)
    #[arg(long)]
    pub(crate) name: Option<String>,
    /// Output format
    #[arg(long, value_enum, default_value_t = MachineFormat::Table)]
    pub(crate) format: MachineFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub(crate) enum MachineFormat {
    Table,
    Mermaid,
    Json,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Machines(args) => print_machines(args),
        Command::Demo(args) => run_demo(args),
    }
}

fn print_machines(args: MachinesArgs) -> Result<(), AppError> {
    let selected: Vec<_> = match args.name.as_deref() {
        Some(name) => vec![workflows::machine(name)
            .ok_or_else(|| AppError::BadRequest(format!("unknown machine '{name}'")))?],
        None => workflows::machines().to_vec(),
    };

    for machine in selected {
        match args.format {
            MachineFormat::Mermaid => println!("{}\n", machine.mermaid()),
            MachineFormat::Json => match serde_json::to_string_pretty(&machine.summary()) {
                Ok(json) => println!("{json}"),
                Err(err) => println!("{} summary unavailable: {err}", machine.name()),
            },
            MachineFormat::Table => {
                let summary = machine.summary();
                println!(
                    "{} ({} states, initial {})",
                    summary.machine,
                    summary.states.len(),
                    summary.initial
                );
                for row in summary.transitions {
                    let guard = row
                        .guard
                        .map(|guard| format!(" [{guard}]"))
                        .unwrap_or_default();
                    let hooks = if row.hooks.is_empty() {
                        String::new()
                    } else {
                        format!(" -> {}", row.hooks.join(", "))
                    };
                    let then = row
                        .then
                        .map(|next| format!(" then {next}"))
                        .unwrap_or_default();
                    println!(
                        "  {:<28} {} => {}{}{}{}",
                        row.event,
                        row.from.join("|"),
                        row.to,
                        guard,
                        hooks,
                        then
                    );
                }
                println!();
            }
        }
    }
    Ok(())
}
