use std::{
    future::Future,
    io::{Write as _, stdout},
    time,
};

use airtable::{
    Client, Profile, ReqwestTransport,
    records::{ListRecordsParams, Sort, Table},
};
use anyhow::bail;
use clap::{Parser, Subcommand};
use tabwriter::TabWriter;
use tracing::{debug, info};

#[derive(Debug, Parser)]
#[command(
    name = "airtable",
    about = "A command-line client for Airtable",
    version,
    propagate_version = true
)]
pub(crate) struct Args {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// How to format output.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum Output {
    Json,
    #[default]
    Tty,
}

#[derive(Debug, clap::Args)]
#[command(next_help_heading = "Global Options")]
pub(crate) struct GlobalArgs {
    /// Name of the profile to use
    #[arg(long, short = 'P', global = true)]
    pub profile: Option<String>,
    /// Output format
    #[arg(long, short = 'O', global = true)]
    pub output: Option<Output>,
    /// Timeout (in seconds) for client operations (-1 = no timeout)
    #[arg(long, global = true)]
    pub client_timeout: Option<i64>,
    /// Print verbose logs
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Print version.
    Version,
    /// List the records in a table
    #[clap(alias = "ls")]
    Records(RecordsArgs),
}

#[derive(Debug, clap::Args)]
pub(crate) struct RecordsArgs {
    /// Table name or ID
    pub table: String,
    /// Only return records in this view
    #[arg(long)]
    pub view: Option<String>,
    /// Only return this field (repeatable)
    #[arg(short, long = "field")]
    pub fields: Vec<String>,
    /// Only return records matching this formula
    #[arg(long)]
    pub formula: Option<String>,
    /// The maximum number of records to return
    #[arg(long)]
    pub max_records: Option<u32>,
    /// The number of records per page (at most 100)
    #[arg(long)]
    pub page_size: Option<u32>,
    /// Sort by FIELD[:asc|:desc] (repeatable)
    #[arg(short, long)]
    pub sort: Vec<Sort>,
    /// Continue from the offset printed with a previous page
    #[arg(long)]
    pub offset: Option<String>,
}

pub(crate) fn run(args: Args) -> anyhow::Result<()> {
    let Command::Records(records) = args.command else {
        println!("airtable {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    };

    let profile = if let Some(name) = args.global.profile.as_deref() {
        Profile::from_env(name)
    } else {
        Profile::from_default_env()
    };

    let profile = profile?.with_ua_product("airtable-cli");
    debug!(?profile, ?records, "cli invocation");

    let timeout = match args.global.client_timeout {
        Some(-1) | None => None,
        Some(v) if v > 0 => Some(time::Duration::from_secs(v as _)),
        Some(v) => bail!("Invalid timeout value: {v}"),
    };

    let mut http = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        http = http.timeout(timeout);
    }

    let client = Client::from_profile(profile, ReqwestTransport::new(http.build()?));
    let output = args.global.output.unwrap_or_default();

    with_rt(list_records(&client, output, records))
}

fn with_rt<T, F: Future<Output = T>>(f: F) -> T {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let _guard = rt.enter();
    rt.block_on(f)
}

/// Completes on ^C. If the handler can't be installed, never completes.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn list_records(client: &Client, output: Output, args: RecordsArgs) -> anyhow::Result<()> {
    let RecordsArgs {
        table,
        view,
        fields,
        formula,
        max_records,
        page_size,
        sort,
        offset,
    } = args;

    let params = ListRecordsParams {
        fields,
        filter_by_formula: formula,
        max_records,
        page_size,
        sort,
        view,
        offset,
        ..Default::default()
    };

    let table = client.table(table).list(interrupted(), &params).await?;

    match output {
        Output::Json => {
            serde_json::to_writer_pretty(stdout().lock(), &table)?;
            println!();
        }
        Output::Tty => print_table(&table)?,
    }

    if let Some(offset) = &table.offset {
        info!("more records available, continue with --offset {offset}");
    }

    Ok(())
}

fn print_table(table: &Table) -> anyhow::Result<()> {
    let mut tw = TabWriter::new(stdout());
    writeln!(&mut tw, "ID\tCREATED\tFIELDS")?;
    for record in &table.records {
        let created = record
            .created_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        writeln!(
            &mut tw,
            "{}\t{}\t{}",
            record.id,
            created,
            serde_json::to_string(&record.fields)?
        )?;
    }

    tw.flush()?;
    Ok(())
}
