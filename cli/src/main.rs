use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dynproto::{parse_to_json, CodecError, Engine, SchemaError};

#[derive(Parser)]
#[command(name = "dynproto")]
#[command(about = "Compile .proto trees and convert messages between JSON and protobuf", long_about = None)]
struct Cli {
    /// Deployment environment; selects the default log format and level
    #[arg(long, env = "DPJS_ENV", default_value = "development", global = true)]
    env: String,

    /// Root directory of the `.proto` tree
    #[arg(long, env = "DPJS_PROTO_DIR", default_value = "../protos/proto/", global = true)]
    proto_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile every `.proto` file under the schema root and report what was loaded
    Check,

    /// Convert a JSON document to protobuf bytes
    Encode {
        /// Schema file, relative to the schema root
        #[arg(short, long)]
        file: String,

        /// Message name, relative to the file's package
        #[arg(short, long)]
        message: String,

        /// Input JSON file (reads stdin if omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output file (writes stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Convert protobuf bytes to JSON (printed to stdout)
    Decode {
        /// Schema file, relative to the schema root
        #[arg(short, long)]
        file: String,

        /// Message name, relative to the file's package
        #[arg(short, long)]
        message: String,

        /// Input binary file (reads stdin if omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Print the syntax tree of a single `.proto` file as JSON
    Ast {
        /// Input `.proto` file
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn init_logging(env: &str) {
    let default = match env {
        "development" => "debug",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);

    match env {
        "development" => builder.pretty().init(),
        "production" => builder.json().init(),
        _ => builder.compact().with_target(false).init(),
    }
}

fn read_input(input: Option<&Path>) -> Result<Vec<u8>, CliError> {
    match input {
        Some(path) => Ok(fs::read(path)?),
        None => {
            let mut data = Vec::new();
            io::stdin().lock().read_to_end(&mut data)?;
            Ok(data)
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Check => {
            let engine = Engine::initialize(&cli.proto_dir)?;
            let registry = engine.registry();
            println!(
                "Loaded {} files, {} messages from {}",
                registry.len(),
                registry.messages().count(),
                cli.proto_dir.display()
            );
            Ok(())
        }

        Commands::Encode { file, message, input, output } => {
            let engine = Engine::initialize(&cli.proto_dir)?;
            let json = read_input(input.as_deref())?;
            let bytes = engine.json_to_protobuf(&file, &message, &json)?;
            match output {
                Some(path) => {
                    fs::write(&path, &bytes)?;
                    info!(path = %path.display(), size = bytes.len(), "wrote protobuf");
                }
                None => io::stdout().lock().write_all(&bytes)?,
            }
            Ok(())
        }

        Commands::Decode { file, message, input } => {
            let engine = Engine::initialize(&cli.proto_dir)?;
            let bytes = read_input(input.as_deref())?;
            let json = engine.protobuf_to_json(&file, &message, &bytes)?;
            let mut stdout = io::stdout().lock();
            stdout.write_all(&json)?;
            writeln!(stdout)?;
            Ok(())
        }

        Commands::Ast { input } => {
            let text = fs::read_to_string(&input)?;
            println!("{}", parse_to_json(&text)?);
            Ok(())
        }
    }
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_logging(&cli.env);

    run(cli).map_err(|err| {
        error!(error = %err, "command failed");
        err
    })
}
