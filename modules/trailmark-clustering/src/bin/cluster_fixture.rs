//! Diagnostic tool: run the full clustering pipeline over an activities
//! fixture and print what each stage did.
//!
//! Usage: cargo run --bin cluster_fixture -- <activities.json> [--me <handle>]... [--existing <n>]
//!
//! LLM stages run when ANTHROPIC_API_KEY is set. Records go to Postgres when
//! DATABASE_URL is set, otherwise to an in-memory store that is printed at
//! the end.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use trailmark_clustering::{ClusteringPipeline, GroupingStore, InMemoryGroupingStore, PgGroupingStore};
use trailmark_common::{Activity, Config, SyncScope};

struct Args {
    fixture: String,
    me: Vec<String>,
    existing: usize,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut fixture = None;
    let mut me = Vec::new();
    let mut existing = 0;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--me" => me.push(args.next().context("--me needs a value")?),
            "--existing" => {
                existing = args
                    .next()
                    .context("--existing needs a value")?
                    .parse()
                    .context("--existing must be a number")?
            }
            _ if fixture.is_none() => fixture = Some(arg),
            other => bail!("unexpected argument: {other}"),
        }
    }
    Ok(Args {
        fixture: fixture.context("usage: cluster_fixture <activities.json> [--me <handle>]... [--existing <n>]")?,
        me,
        existing,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("trailmark=info".parse()?))
        .init();

    let args = parse_args()?;
    let config = Config::from_env();
    config.log_redacted();

    let raw = std::fs::read_to_string(&args.fixture)
        .with_context(|| format!("reading {}", args.fixture))?;
    let activities: Vec<Activity> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", args.fixture))?;

    let memory = Arc::new(InMemoryGroupingStore::new());
    let store: Arc<dyn GroupingStore> = match &config.database_url {
        Some(url) => {
            let pg = PgGroupingStore::connect(url).await?;
            pg.migrate().await?;
            Arc::new(pg) as Arc<dyn GroupingStore>
        }
        None => memory.clone() as Arc<dyn GroupingStore>,
    };

    let author = args.me.first().cloned().unwrap_or_else(|| "fixture".to_string());
    let scope = SyncScope::new(author, "fixture");
    let llm = config.llm_enabled();
    let pipeline = ClusteringPipeline::from_config(config, store.clone());
    if !llm {
        println!("ANTHROPIC_API_KEY not set, skipping refinement and naming");
    }

    let report = pipeline.run(activities, &args.me, args.existing, &scope).await?;
    println!("{report}");

    if !memory.is_empty().await {
        println!("\n=== Grouping records ===");
        for record in memory.list(&scope).await? {
            println!(
                "{} [{}] {} activities{}",
                record.cluster_ref.as_deref().unwrap_or("(temporal)"),
                record.grouping_method.as_str(),
                record.activity_ids.len(),
                if record.narrative_pending { ", narrative pending" } else { "" },
            );
        }
    }

    Ok(())
}
