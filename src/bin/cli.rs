//! aerowire CLI Client
//!
//! Command-line interface for issuing single requests against a cluster.

use clap::{Parser, Subcommand};
use crossbeam::channel::Receiver;
use tracing_subscriber::{fmt, EnvFilter};

use aerowire::{
    completion_channel, AeroError, Bin, Completion, Config, Driver, Engine, Key, Result,
    StaticCluster, TcpEngine, TokioReactor, Value,
};

/// Integer key used by the demo
const DEMO_KEY: i64 = 0x4_51bf_9231;

/// Size of the demo blob
const DEMO_BLOB_SIZE: usize = 1200;

/// aerowire CLI
#[derive(Parser, Debug)]
#[command(name = "aerowire-cli")]
#[command(about = "Issue requests against an Aerospike-protocol cluster")]
#[command(version)]
struct Args {
    /// Comma-separated seed hosts (host:port)
    #[arg(long, default_value = "127.0.0.1:3000")]
    hosts: String,

    /// Namespace
    #[arg(short, long, default_value = "test")]
    namespace: String,

    /// Set name
    #[arg(short, long, default_value = "")]
    set: String,

    /// Request timeout in milliseconds (0 = none)
    #[arg(short, long, default_value = "1000")]
    timeout_ms: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write one bin
    Put {
        /// Record key (integers are sent as integer keys)
        key: String,

        /// Bin name
        bin: String,

        /// Bin value (integers are sent as integers)
        value: String,
    },

    /// Read named bins
    Get {
        /// Record key
        key: String,

        /// Bins to read
        #[arg(required = true)]
        bins: Vec<String>,
    },

    /// Read every bin
    GetAll {
        /// Record key
        key: String,
    },

    /// Delete a record
    Delete {
        /// Record key
        key: String,
    },

    /// Write a blob and read it back
    Demo,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,aerowire=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("aerowire CLI v{}", aerowire::VERSION);

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = Config::builder()
        .hosts(args.hosts.split(',').map(str::trim).filter(|h| !h.is_empty()))
        .build();

    let driver = Driver::new()?;
    let cluster = StaticCluster::new(&config, driver.handle())?;
    let mut engine = Engine::new(config, cluster, TokioReactor::new());

    let ns = args.namespace.as_str();
    let timeout = args.timeout_ms;

    match args.command {
        Commands::Put { key, bin, value } => {
            let (callback, rx) = completion_channel();
            let bins = vec![Bin::new(bin, parse_value(&value))];
            engine.put(ns, key_of(&args.set, &key), bins, None, timeout, callback)?;
            print_completion(&wait(&driver, &mut engine, &rx)?);
        }
        Commands::Get { key, bins } => {
            let (callback, rx) = completion_channel();
            engine.get(ns, key_of(&args.set, &key), bins.as_slice(), timeout, callback)?;
            print_completion(&wait(&driver, &mut engine, &rx)?);
        }
        Commands::GetAll { key } => {
            let (callback, rx) = completion_channel();
            engine.get_all(ns, key_of(&args.set, &key), timeout, callback)?;
            print_completion(&wait(&driver, &mut engine, &rx)?);
        }
        Commands::Delete { key } => {
            let (callback, rx) = completion_channel();
            engine.delete(ns, key_of(&args.set, &key), None, timeout, callback)?;
            print_completion(&wait(&driver, &mut engine, &rx)?);
        }
        Commands::Demo => demo(&driver, &mut engine, ns, &args.set, timeout)?,
    }

    engine.log_stats();
    Ok(())
}

fn demo(driver: &Driver, engine: &mut TcpEngine, ns: &str, set: &str, timeout: u32) -> Result<()> {
    let blob: Vec<u8> = (0..DEMO_BLOB_SIZE).map(|i| (i % 251) as u8).collect();
    let key = Key::new(set, DEMO_KEY);

    let (callback, rx) = completion_channel();
    let bins = vec![Bin::new("blob", Value::blob(blob.clone()))];
    engine.put(ns, key.clone(), bins, None, timeout, callback)?;
    let put = wait(driver, engine, &rx)?;
    println!("put: {:?}", put.result);
    if !put.result.is_ok() {
        return Err(AeroError::Protocol(format!("demo put failed: {:?}", put.result)));
    }

    let (callback, rx) = completion_channel();
    engine.get_all(ns, key, timeout, callback)?;
    let read = wait(driver, engine, &rx)?;
    print_completion(&read);

    let matches = read
        .bins
        .iter()
        .any(|bin| bin.name == "blob" && bin.value.as_bytes() == Some(&blob[..]));
    if !matches {
        return Err(AeroError::Protocol("demo blob did not read back intact".to_string()));
    }
    println!("demo ok: {} byte blob round-tripped", DEMO_BLOB_SIZE);
    Ok(())
}

fn wait(driver: &Driver, engine: &mut TcpEngine, rx: &Receiver<Completion>) -> Result<Completion> {
    driver
        .run_until(engine, || rx.try_recv().ok())
        .ok_or_else(|| AeroError::Protocol("request finished without a completion".to_string()))
}

fn key_of(set: &str, raw: &str) -> Key {
    Key::new(set, parse_value(raw))
}

fn parse_value(raw: &str) -> Value {
    match raw.parse::<i64>() {
        Ok(v) => Value::Int(v),
        Err(_) => Value::from(raw),
    }
}

fn print_completion(completion: &Completion) {
    println!(
        "result: {:?} ({}), generation: {}",
        completion.result,
        completion.result.code(),
        completion.generation
    );
    for bin in &completion.bins {
        match &bin.value {
            Value::Blob(kind, data) => println!("  {} = <{:?} blob, {} bytes>", bin.name, kind, data.len()),
            other => println!("  {} = {:?}", bin.name, other),
        }
    }
}
