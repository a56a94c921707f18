//! Cape RLS command line
//!
//! Inspect how policies rewrite a statement, or which rows a subject can see
//! in a JSON data set.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use cape::common::config::CapeConfig;
use cape::common::{Action, Subject, SubjectContext, Value};
use cape::rls::{MemoryDatabase, Query};
use cape::{init_tracing, Cape};

#[derive(Parser, Debug)]
#[command(name = "cape-rls")]
#[command(about = "Row level security policy inspector", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "cape.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the statement a subject's query is rewritten to
    Rewrite(Request),
    /// Run a query against a JSON data file and print the visible rows
    Check {
        #[command(flatten)]
        request: Request,

        /// JSON object mapping table names to arrays of rows
        #[arg(short, long)]
        data: PathBuf,
    },
}

#[derive(ClapArgs, Debug)]
struct Request {
    /// Policy manifest (TOML or JSON)
    #[arg(short, long)]
    manifest: PathBuf,

    /// Acting subject identifier
    #[arg(short, long)]
    subject: String,

    /// Roles resolved for the subject
    #[arg(long = "role")]
    roles: Vec<String>,

    /// Action to authorize (read, create, update, delete)
    #[arg(short, long, default_value = "read")]
    action: Action,

    /// Target resource
    #[arg(short, long)]
    resource: String,

    /// Context claim as field=value; repeat a field for a set of values
    #[arg(long = "context", value_parser = parse_claim)]
    context: Vec<(String, Value)>,
}

impl Request {
    fn subject(&self) -> Subject {
        Subject::new(&self.subject).with_roles(self.roles.iter().cloned())
    }

    fn subject_context(&self) -> SubjectContext {
        let mut context = SubjectContext::new();
        for (field, value) in &self.context {
            let merged = match context.get(field) {
                None => value.clone(),
                Some(Value::Array(existing)) => {
                    let mut values = existing.clone();
                    values.push(value.clone());
                    Value::Array(values)
                }
                Some(existing) => Value::Array(vec![existing.clone(), value.clone()]),
            };
            context.insert(field.clone(), merged);
        }
        context
    }

    fn query(&self) -> Query {
        match self.action {
            Action::Update => Query::update(&self.resource),
            Action::Delete => Query::delete(&self.resource),
            Action::Read | Action::Create | Action::Any => Query::select(&self.resource),
        }
    }
}

fn parse_claim(s: &str) -> Result<(String, Value), String> {
    let (field, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected field=value, got '{s}'"))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((field.trim().to_string(), value))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if args.config.exists() {
        CapeConfig::load(&args.config)?
    } else {
        CapeConfig::default()
    };
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }

    init_tracing(&config.logging);
    info!("Cape RLS v{}", env!("CARGO_PKG_VERSION"));

    let mut cape = Cape::new(config);

    match &args.command {
        Command::Rewrite(request) => {
            cape.load_manifest(&request.manifest)?;
            let rewritten = cape.rls().filter_query(
                request.query(),
                &request.subject(),
                request.action,
                &request.subject_context(),
            )?;
            println!("{rewritten}");
        }
        Command::Check { request, data } => {
            let content = std::fs::read_to_string(data)?;
            let db = MemoryDatabase::from_json(serde_json::from_str(&content)?)?;
            cape = cape.with_database(db);
            cape.load_manifest(&request.manifest)?;

            let rewritten = cape.rls().filter_query(
                Query::select(&request.resource),
                &request.subject(),
                Action::Read,
                &request.subject_context(),
            )?;
            println!("-- {rewritten}");
            for row in cape.database_mut().execute(&rewritten)?.rows() {
                println!("{}", serde_json::to_string(&row.values)?);
            }
        }
    }

    Ok(())
}
