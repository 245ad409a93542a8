//! Command line front end for the Leitstellenspiel API mirror.
//!
//! ```bash
//! # Bring every stale table up to date
//! lss sync
//!
//! # One table, then read from it
//! lss get vehicles --key 4711
//! lss get buildings --index building_type --value 0
//! lss count vehicles
//! ```

use clap::{Parser, Subcommand};
use lss_config::Config;
use lss_remote::{HttpTransport, ScriptIdentity, TransportHandle};
use lss_store::{CURRENT_VERSION, IndexValue, Key, StoreManager, StoreOptions, Table, Thresholds};
use lss_sync::{ApiStorage, Fetched, Lookup, Progress, SyncOptions};
use miette::{IntoDiagnostic, Result, miette};
use serde_json::{Map, Value};
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lss", version, about = "Local mirror of the Leitstellenspiel REST APIs")]
struct Cli {
    /// Configuration file (defaults to `config.toml` in the platform config directory)
    #[arg(short, long, global = true, env = "LSS_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `lss_sync=debug`
    #[arg(long, global = true, env = "RUST_LOG", default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh stale tables from the API
    Sync {
        /// Only this table (all tables if omitted)
        #[arg(value_parser = parse_table)]
        table: Option<Table>,
    },
    /// Fetch records, refreshing the table first if it is stale
    Get {
        #[arg(value_parser = parse_table)]
        table: Table,
        /// Primary key of a single record
        #[arg(long, conflicts_with = "index")]
        key: Option<String>,
        /// Secondary index to look up through
        #[arg(long, requires = "value")]
        index: Option<String>,
        #[arg(long, requires = "index")]
        value: Option<String>,
        /// Read the local store only
        #[arg(long)]
        offline: bool,
    },
    /// List the primary keys stored in a table
    Keys {
        #[arg(value_parser = parse_table)]
        table: Table,
    },
    /// Count the records stored in a table
    Count {
        #[arg(value_parser = parse_table)]
        table: Table,
    },
    /// Number of vehicles the account owns, asked from the API
    VehiclesCount,
}

fn report(err: impl Debug) -> miette::Report {
    miette!("{err:?}")
}

fn parse_table(raw: &str) -> std::result::Result<Table, String> {
    raw.parse().map_err(|err: lss_store::error::Error| err.to_string())
}

/// Numbers become integer keys, anything else is a text key.
fn parse_key(raw: &str) -> Key {
    raw.parse::<i64>().map(Key::Int).unwrap_or_else(|_| Key::from(raw))
}

fn parse_index_value(raw: &str) -> IndexValue {
    match raw {
        "true" => IndexValue::Bool(true),
        "false" => IndexValue::Bool(false),
        _ => raw.parse::<i64>().map(IndexValue::Int).unwrap_or_else(|_| IndexValue::from(raw)),
    }
}

fn lookup(table: Table, key: Option<String>, index: Option<String>, value: Option<String>) -> Result<Lookup> {
    Ok(match (key, index, value) {
        (Some(key), _, _) => Lookup::Key(parse_key(&key)),
        (None, Some(index), Some(value)) => {
            let def = table.index(&index).map_err(report)?;
            Lookup::index(def.path, parse_index_value(&value))
        },
        _ => Lookup::All,
    })
}

fn to_json(fetched: Fetched) -> Value {
    match fetched {
        Fetched::One(value) => value.unwrap_or(Value::Null),
        Fetched::Many(values) => Value::Array(values),
        Fetched::Map(map) => Value::Object(map.into_iter().map(|(k, v)| (k.to_string(), v)).collect::<Map<_, _>>()),
    }
}

fn print(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn storage(config: &Config) -> Result<ApiStorage> {
    let version = config.schema_version.unwrap_or(CURRENT_VERSION);
    let options = StoreOptions::new(&config.database)
        .with_version(version)
        .with_max_connections(config.max_connections);
    let identity = ScriptIdentity {
        name: config.script_name.clone(),
        version: config.script_version.clone(),
    };
    let transport: TransportHandle =
        Arc::new(HttpTransport::new(config.base_url.clone(), &identity, version).map_err(report)?);
    let sync = SyncOptions {
        thresholds: Thresholds {
            fast: config.fast_threshold(),
            slow: config.slow_threshold(),
        },
        vehicle_base_limit: config.vehicle_base_limit,
        vehicle_divisor: config.vehicle_divisor,
    };
    Ok(ApiStorage::new(Arc::new(StoreManager::new(options)), transport, sync))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).into_diagnostic()?)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref()).map_err(report)?;
    let api = storage(&config)?;
    let progress: Progress<'_> = &|page: &[Value]| info!(records = page.len(), "page stored");

    match cli.command {
        Command::Sync { table: Some(table) } => {
            let refreshed = api.synchronizer().refresh_with_progress(table, Some(progress)).await.map_err(report)?;
            info!(%table, refreshed, "sync finished");
        },
        Command::Sync { table: None } => {
            for (table, refreshed) in api.synchronizer().refresh_all().await.map_err(report)? {
                info!(%table, refreshed, "sync finished");
            }
        },
        Command::Get { table, key, index, value, offline } => {
            let lookup = lookup(table, key, index, value)?;
            let fetched = if offline {
                api.read(table, lookup).await
            } else {
                api.get_with_progress(table, lookup, Some(progress)).await
            };
            print(&to_json(fetched.map_err(report)?))?;
        },
        Command::Keys { table } => {
            let keys = api.synchronizer().store().get_all_keys(table).await.map_err(report)?;
            print(&Value::Array(keys.into_iter().map(|key| Value::String(key.to_string())).collect()))?;
        },
        Command::Count { table } => {
            let count = api.synchronizer().store().count(table).await.map_err(report)?;
            println!("{count}");
        },
        Command::VehiclesCount => {
            println!("{}", api.vehicles_count().await.map_err(report)?);
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("42", Key::Int(42))]
    #[case("-1", Key::Int(-1))]
    #[case("credits_user_total", Key::from("credits_user_total"))]
    #[case("4.5", Key::from("4.5"))]
    fn test_parse_key(#[case] raw: &str, #[case] expected: Key) {
        assert_eq!(parse_key(raw), expected);
    }

    #[rstest]
    #[case("true", IndexValue::Bool(true))]
    #[case("7", IndexValue::Int(7))]
    #[case("red", IndexValue::from("red"))]
    fn test_parse_index_value(#[case] raw: &str, #[case] expected: IndexValue) {
        assert_eq!(parse_index_value(raw), expected);
    }

    #[test]
    fn test_lookup_resolves_index_names() {
        let lookup = lookup(Table::Buildings, None, Some("building_type".into()), Some("0".into())).unwrap();
        assert!(matches!(lookup, Lookup::Index { index: "building_type", value: IndexValue::Int(0) }));
        assert!(super::lookup(Table::Buildings, None, Some("nope".into()), Some("0".into())).is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["lss", "get", "vehicles", "--key", "3"]).unwrap();
        assert!(matches!(cli.command, Command::Get { table: Table::Vehicles, .. }));
        assert!(Cli::try_parse_from(["lss", "count", "nonsense"]).is_err());
    }
}
