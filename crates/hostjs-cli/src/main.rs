//! # HostJS CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Run a script and print its result as JSON
//! hostjs run main.js -w ./project --context tenant=acme
//!
//! # Run a TypeScript entry point (compiled with tsc first when stale)
//! hostjs run main.ts --tsc ./node_modules/.bin/tsc
//!
//! # Syntax-check a script without running it
//! hostjs check main.mjs
//!
//! # Print the dependency-cache key of a URL
//! hostjs cache-key https://example.test/lib.js
//! ```

use anyhow::Result;
use argh::FromArgs;
use hostjs_cli::{parse_context, runner_config, RunOptions};
use hostjs_common::{cache_key, ModuleType};
use hostjs_runtime::CodeRunner;
use std::path::PathBuf;

#[derive(FromArgs)]
/// HostJS - run guest JavaScript and TypeScript on an embedded engine
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Run(RunArgs),
    Check(CheckArgs),
    CacheKey(CacheKeyArgs),
}

/// Arguments for running a script.
///
/// The produced value (a script's completion value or an ES module's default
/// export) is printed to stdout as JSON; logs go to stderr.
#[derive(FromArgs)]
#[argh(subcommand, name = "run")]
/// run a script and print its result as JSON
struct RunArgs {
    /// script to run, relative to the working directory
    #[argh(positional)]
    script: String,

    /// project root; defaults to the current directory
    #[argh(option, short = 'w', long = "working-dir")]
    working_dir: Option<PathBuf>,

    /// caches directory; defaults to $HOSTJS_CACHE_DIR, then <working-dir>/.hostjs-cache
    #[argh(option, short = 'c', long = "caches-dir")]
    caches_dir: Option<PathBuf>,

    /// execution-context entry as key=value (value parsed as JSON when possible); repeatable
    #[argh(option, long = "context")]
    context: Vec<String>,

    /// how entry points are evaluated: auto, esm or cjs
    #[argh(option, long = "module-type")]
    module_type: Option<ModuleType>,

    /// typescript compiler executable; defaults to $HOSTJS_TSC, then tsc
    #[argh(option, long = "tsc")]
    tsc: Option<String>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "check")]
/// parse a script without running it
struct CheckArgs {
    /// script to check, relative to the working directory
    #[argh(positional)]
    script: String,

    /// project root; defaults to the current directory
    #[argh(option, short = 'w', long = "working-dir")]
    working_dir: Option<PathBuf>,

    /// caches directory; defaults to $HOSTJS_CACHE_DIR, then <working-dir>/.hostjs-cache
    #[argh(option, short = 'c', long = "caches-dir")]
    caches_dir: Option<PathBuf>,

    /// how entry points are parsed: auto, esm or cjs
    #[argh(option, long = "module-type")]
    module_type: Option<ModuleType>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "cache-key")]
/// print the dependency-cache key of a locator
struct CacheKeyArgs {
    /// url or package name to encode (or key to decode with --decode)
    #[argh(positional)]
    locator: String,

    /// decode a key back into its locator instead
    #[argh(switch, long = "decode")]
    decode: bool,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn run(args: RunArgs) -> Result<()> {
    let options = RunOptions {
        working_dir: args.working_dir,
        caches_dir: args.caches_dir,
        module_type: args.module_type,
        compiler: args.tsc,
    };
    let config = runner_config(&options, env_var)?;
    let context = parse_context(&args.context)?;

    let runner = CodeRunner::builder(config)
        .with_execution_context(context)
        .build()?;
    let outcome = runner.run(&args.script);
    runner.close()?;

    let value = outcome?;
    println!("{}", serde_json::to_string(&value)?);
    Ok(())
}

fn check(args: CheckArgs) -> Result<()> {
    let options = RunOptions {
        working_dir: args.working_dir,
        caches_dir: args.caches_dir,
        module_type: args.module_type,
        ..RunOptions::default()
    };
    let config = runner_config(&options, env_var)?;

    let runner = CodeRunner::builder(config).build()?;
    let outcome = runner.check(&args.script);
    runner.close()?;

    outcome?;
    tracing::info!(script = %args.script, "Syntax OK");
    Ok(())
}

fn print_cache_key(args: CacheKeyArgs) -> Result<()> {
    if args.decode {
        let locator = cache_key::decode_key(&args.locator)
            .ok_or_else(|| anyhow::anyhow!("'{}' is not a HostJS cache key", args.locator))?;
        println!("{}", locator);
    } else {
        println!("{}", cache_key::encode_locator(&args.locator));
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Set default log level to INFO, but allow RUST_LOG env var to override.
    // Logs go to stderr so stdout stays clean JSON.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Check(args) => check(args),
        Commands::CacheKey(args) => print_cache_key(args),
    }
}
