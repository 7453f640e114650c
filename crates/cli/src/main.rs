//! `myob-tools`: list and call MYOB/Acumatica ERP operations from the command line.

mod config;
mod output;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use myob_openapi_tools::pagination::{PageOptions, fetch_single, paginate};
use myob_openapi_tools::runtime::ErpToolSource;
use serde_json::Value;
use std::io::Read as _;
use std::process::ExitCode;
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

#[derive(Parser, Debug)]
#[command(name = "myob-tools", version)]
#[command(about = "Call MYOB/Acumatica REST operations as tools", long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: config::ConnectionArgs,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long, env = "MYOB_LOG_LEVEL", default_value = "warn", global = true)]
    log_level: String,

    #[arg(long, env = "MYOB_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the available tools.
    Tools,

    /// Call one tool.
    Call {
        tool: String,

        /// Arguments as JSON. `-` reads them from stdin.
        #[arg(long, default_value = "{}")]
        args: String,

        /// Skip logging in from configured credentials first.
        #[arg(long)]
        no_auto_login: bool,
    },

    /// Log in and report the session cookies.
    Login {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        company: Option<String>,
        #[arg(long)]
        branch: Option<String>,
    },

    /// Page through a list operation, printing the count and a sample.
    Paginate {
        tool: String,

        #[arg(long, default_value = "{}")]
        args: String,

        #[arg(long, default_value_t = myob_openapi_tools::pagination::DEFAULT_PAGE_TOP)]
        top: u64,

        #[arg(long, default_value_t = myob_openapi_tools::pagination::DEFAULT_MAX_PAGES)]
        max_pages: u32,

        #[arg(long, default_value_t = myob_openapi_tools::pagination::DEFAULT_PAGE_SAMPLE_SIZE)]
        sample_size: usize,

        /// Fields for `$select`, comma-separated.
        #[arg(long, value_delimiter = ',')]
        select: Vec<String>,

        /// Fetch only the first record instead of paging.
        #[arg(long)]
        single: bool,

        #[arg(long)]
        no_auto_login: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    let cfg = cli.connection.resolve()?;
    let source = ErpToolSource::build("myob", cfg)
        .await
        .context("start ERP tool source")?;

    match cli.command {
        Command::Tools => {
            output::print_tools(&source.list_tools(), cli.json)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Call {
            tool,
            args,
            no_auto_login,
        } => {
            let args = parse_args(&args)?;
            if !no_auto_login {
                try_auto_login(&source, &tool).await;
            }
            let result = source
                .call_tool(&tool, args)
                .await
                .with_context(|| format!("call {tool}"))?;
            let failed = result.is_error == Some(true);
            output::print_call_result(&result, cli.json)?;
            Ok(exit_for(failed, &format!("{tool} returned an error result")))
        }
        Command::Login {
            name,
            password,
            company,
            branch,
        } => {
            let args = serde_json::json!({
                "name": name,
                "password": password,
                "company": company,
                "branch": branch,
            });
            let outcome = source.login(&args).await?;
            let failed = !outcome.ok;
            let status = outcome.status_code;
            output::print_call_result(&outcome.into_call_tool_result(), cli.json)?;
            Ok(exit_for(failed, &format!("login failed with status {status}")))
        }
        Command::Paginate {
            tool,
            args,
            top,
            max_pages,
            sample_size,
            select,
            single,
            no_auto_login,
        } => {
            let args = parse_args(&args)?;
            if !no_auto_login {
                try_auto_login(&source, &tool).await;
            }
            if single {
                let record = fetch_single(&source, &tool, &args, None)
                    .await
                    .with_context(|| format!("fetch {tool}"))?;
                output::print_json(&record)?;
                return Ok(exit_for(record.is_none(), &format!("{tool} returned no record")));
            }
            let options = PageOptions {
                top,
                max_pages,
                sample_size,
                select,
            };
            let acc = paginate(&source, &tool, &args, &options, None)
                .await
                .with_context(|| format!("paginate {tool}"))?;
            output::print_json(&acc)?;
            let reason = match &acc.failure {
                Some(f) => format!("{tool} page {} failed with status {}", f.page, f.status),
                None => format!("{tool} pagination incomplete"),
            };
            Ok(exit_for(!acc.complete, &reason))
        }
    }
}

async fn try_auto_login(source: &ErpToolSource, tool: &str) {
    let logged_in = source.auto_login().await;
    debug!(tool, logged_in, "auto-login before call");
}

/// Tool-level failures exit with 2; setup errors exit with 1.
fn exit_for(failed: bool, reason: &str) -> ExitCode {
    if failed {
        warn!(reason, "exiting with status 2");
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}

fn parse_args(raw: &str) -> anyhow::Result<Value> {
    let text = if raw.trim() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read arguments from stdin")?;
        buf
    } else {
        raw.to_string()
    };
    // Non-JSON text is passed through as a string; the normalizer decides what it means.
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}
