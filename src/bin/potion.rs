//! Potion CLI
//!
//! Command-line interface for browsing a Potion API through its schema.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use potion_client::{Client, ClientOptions, Data, Error, Instance, OutputKind, ResourceType};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "potion")]
#[command(about = "Explore and query JSON Hyper-Schema (Potion) REST APIs")]
#[command(version)]
struct Cli {
    /// API base URL (e.g. http://localhost:5000)
    #[arg(long, short)]
    url: String,

    /// Path of the root schema, relative to the base URL
    #[arg(long, default_value = potion_client::DEFAULT_SCHEMA_PATH)]
    schema_path: String,

    /// Extra request header, as 'Name: value' (repeatable)
    #[arg(long = "header", short = 'H')]
    headers: Vec<String>,

    /// Log requests and schema resolution to stderr
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List resources with their properties and links
    Resources,

    /// Print a resource schema with all $ref pointers inlined
    Schema {
        /// Resource name (e.g. user or User)
        resource: String,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Fetch one instance
    Get {
        /// Resource name (e.g. user or User)
        resource: String,

        /// Instance identifier
        id: String,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// List instances, one JSON document per line
    List {
        /// Resource name (e.g. user or User)
        resource: String,

        /// Page size requested from the server
        #[arg(long)]
        per_page: Option<usize>,

        /// Stop after this many instances
        #[arg(long)]
        limit: Option<usize>,

        /// Filter, as a JSON object (sent as the `where` parameter)
        #[arg(long = "where")]
        filter: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = connect(&cli.url, &cli.schema_path, &cli.headers).and_then(|client| {
        match cli.command {
            Commands::Resources => run_resources(&client),
            Commands::Schema { resource, pretty } => run_schema(&client, &resource, pretty),
            Commands::Get {
                resource,
                id,
                pretty,
            } => run_get(&client, &resource, &id, pretty),
            Commands::List {
                resource,
                per_page,
                limit,
                filter,
            } => run_list(&client, &resource, per_page, limit, filter.as_deref()),
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "potion_client=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fail(e: Error) -> u8 {
    eprintln!("Error: {}", e);
    e.exit_code() as u8
}

fn connect(url: &str, schema_path: &str, headers: &[String]) -> Result<Client, u8> {
    let mut options = ClientOptions::new(url).schema_path(schema_path);
    for header in headers {
        let Some((name, value)) = header.split_once(':') else {
            eprintln!("Error: header must be 'Name: value', got '{}'", header);
            return Err(2);
        };
        options = options.header(name.trim(), value.trim());
    }
    Client::connect(options).map_err(fail)
}

fn resource(client: &Client, name: &str) -> Result<ResourceType, u8> {
    client.resource(name).map_err(fail)
}

fn run_resources(client: &Client) -> Result<(), u8> {
    for resource in client.resources() {
        match resource.description() {
            Some(description) => println!(
                "{} ({})  {}",
                resource.type_name(),
                resource.name(),
                description
            ),
            None => println!("{} ({})", resource.type_name(), resource.name()),
        }

        for (name, attribute) in resource.properties() {
            let mut markers = Vec::new();
            if resource.is_required(name) {
                markers.push("required");
            }
            if attribute.is_read_only() {
                markers.push("read-only");
            }
            let markers = if markers.is_empty() {
                String::new()
            } else {
                format!(" [{}]", markers.join(", "))
            };
            println!("  .{}: {}{}", name, attribute.summary(), markers);
        }

        for link in resource.links() {
            let kind = match link.output_kind() {
                OutputKind::Void => "void",
                OutputKind::Instance => "instance",
                OutputKind::Collection => "collection",
            };
            println!(
                "  {} {} {} -> {}",
                link.name(),
                link.method(),
                link.route().template(),
                kind
            );
        }
    }
    Ok(())
}

fn run_schema(client: &Client, name: &str, pretty: bool) -> Result<(), u8> {
    let resource = resource(client, name)?;
    print_json(resource.bundled_schema(), pretty)
}

fn run_get(client: &Client, name: &str, id: &str, pretty: bool) -> Result<(), u8> {
    let instance = resource(client, name)?.fetch(id).map_err(fail)?;
    print_json(&instance_json(&instance), pretty)
}

fn run_list(
    client: &Client,
    name: &str,
    per_page: Option<usize>,
    limit: Option<usize>,
    filter: Option<&str>,
) -> Result<(), u8> {
    let mut collection = resource(client, name)?.instances().map_err(fail)?;
    if let Some(per_page) = per_page {
        collection = collection.per_page(per_page).map_err(fail)?;
    }
    if let Some(filter) = filter {
        let filter: Value = serde_json::from_str(filter).map_err(|e| {
            eprintln!("Error: --where is not valid JSON: {}", e);
            2u8
        })?;
        collection = collection.param("where", filter).map_err(fail)?;
    }

    for item in collection.iter().take(limit.unwrap_or(usize::MAX)) {
        let item = item.map_err(fail)?;
        let json = match &item {
            Data::Resource(instance) => instance_json(instance),
            other => other.to_json().map_err(fail)?,
        };
        print_json(&json, false)?;
    }
    Ok(())
}

/// Raw properties, `$uri` included.
fn instance_json(instance: &Instance) -> Value {
    Value::Object(instance.raw())
}

fn print_json(value: &Value, pretty: bool) -> Result<(), u8> {
    let output = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;
    println!("{}", output);
    Ok(())
}
