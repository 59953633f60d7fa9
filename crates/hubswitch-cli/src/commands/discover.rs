//! `hubswitch discover`: classify hubs and propose a switchover pair.

use std::path::Path;
use std::sync::Arc;

use clap::Args;

use hubswitch_common::context::KubeconfigClientFactory;
use hubswitch_common::{ClientSettings, ClusterContext, DiscoverySettings, Error, Result};
use hubswitch_discovery::{DiscoveryEngine, DiscoveryReport};

use crate::OutputFormat;

/// Classify hubs across kubeconfig contexts
#[derive(Args, Debug)]
pub struct DiscoverArgs {
    /// Context to inspect; repeat for several (default: every context)
    #[arg(long = "context")]
    pub contexts: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,

    /// Maximum contexts or managed clusters inspected at once
    #[arg(long, default_value_t = hubswitch_common::config::DEFAULT_MAX_CONCURRENCY)]
    pub concurrency: usize,
}

/// Run the discover command.
pub async fn run(args: DiscoverArgs, kubeconfig: Option<&Path>) -> Result<()> {
    // discovery only reads, so clients are built in dry-run mode
    let factory = KubeconfigClientFactory::load(kubeconfig, ClientSettings::default(), true)?;
    let contexts = select_contexts(&factory, &args.contexts)?;

    let settings = DiscoverySettings {
        max_concurrency: args.concurrency.max(1),
        ..DiscoverySettings::default()
    };
    // managed clusters are looked up across the whole kubeconfig
    let lookup = factory.contexts();
    let engine = DiscoveryEngine::new(Arc::new(factory), settings);
    let report = engine.discover(&contexts, &lookup).await;

    println!("{}", render(&report, args.output)?);
    Ok(())
}

fn select_contexts(factory: &KubeconfigClientFactory, names: &[String]) -> Result<Vec<ClusterContext>> {
    if names.is_empty() {
        let all = factory.contexts();
        if all.is_empty() {
            return Err(Error::validation_for_field("--kubeconfig", "kubeconfig has no usable contexts"));
        }
        return Ok(all);
    }
    names.iter().map(|name| factory.context(name)).collect()
}

/// Render a discovery report in the requested format
pub fn render(report: &DiscoveryReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(report.render_table()),
        OutputFormat::Json => serde_json::to_string_pretty(report)
            .map_err(|e| Error::serialization_for_kind("DiscoveryReport", e.to_string())),
    }
}
