use anyhow::{Context, Result};
use chrono::Local;
use log::{info, warn};
use std::io::Write;

use gh_devnet::companies::load_company_categories;
use gh_devnet::edgelist::{build_edge_list, CompanyDirectory};
use gh_devnet::env_loader;
use gh_devnet::graph::{GraphBuilder, GraphKind};
use gh_devnet::models::Edge;
use gh_devnet::resolve::{self, CompanyResolver, PromptResolver, SkipAll};
use gh_devnet::store::RecordStore;

fn main() -> Result<()> {
    env_loader::load_env();
    env_logger::init();

    info!("Starting edge-list and graph construction over persisted records.");

    let output_dir = std::env::var("OUTPUT_DIR").unwrap_or_else(|_| "output".to_string());
    let store = RecordStore::new(&output_dir)?;

    let mut records = store.load_users()?;
    if records.is_empty() {
        warn!("No user records found under '{}'; nothing to build.", output_dir);
        return Ok(());
    }

    // Collapse ambiguous inferred companies: the resolution log first, then
    // the interactive prompt when requested, otherwise skip.
    let mut resolver: Box<dyn CompanyResolver> = if std::env::var("INTERACTIVE_RESOLVE").is_ok() {
        Box::new(PromptResolver::new())
    } else {
        Box::new(SkipAll)
    };
    let outcome = resolve::resolve_ambiguous(&mut records, &store, resolver.as_mut())?;
    if outcome.interrupted {
        info!("Resolution was interrupted; building with what is resolved so far.");
    }

    let categories = load_company_categories(&store.path("company_categories.jsonl"))?;
    let directory = CompanyDirectory::from_records(&records, &categories);
    info!(
        "{} of {} users resolve to a single company.",
        directory.resolved_user_count(),
        records.len()
    );

    let edges = build_edge_list(&records, &directory);

    // The edge list is the artifact downstream table and plot consumers read.
    let timestamp_suffix = Local::now().format("%Y%m%d%H%M%S").to_string();
    let edgelist_path = store.path(&format!("edgelist_{}.jsonl", timestamp_suffix));
    write_edge_list(&edgelist_path, &edges)?;
    info!("Wrote {} edges to {:?}.", edges.len(), edgelist_path);

    for kind in [GraphKind::Attention, GraphKind::Collaboration] {
        let builder = GraphBuilder::new(&edges, kind);
        let user_graph = builder.user_graph();
        let company_graph = builder.company_graph();

        let intra_edges = company_graph
            .edge_weights()
            .filter(|edge| edge.d_intra_level == 1)
            .count();
        let total_weight: u32 = company_graph.edge_weights().map(|edge| edge.weight).sum();
        let total_actions: u32 = company_graph.edge_weights().map(|edge| edge.counts.total()).sum();

        info!(
            "{} graph: {} user nodes, {} user edges; {} companies, {} company edges \
             ({} intra), total weight {}, total actions {}.",
            builder.kind().as_str(),
            user_graph.node_count(),
            user_graph.edge_count(),
            company_graph.node_count(),
            company_graph.edge_count(),
            intra_edges,
            total_weight,
            total_actions
        );
    }

    info!("Graph construction completed successfully.");
    Ok(())
}

fn write_edge_list(path: &std::path::Path, edges: &[Edge]) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .context(format!("Failed to create edge-list file {:?}", path))?;
    for edge in edges {
        let line = serde_json::to_string(edge).context("Failed to serialize edge")?;
        writeln!(file, "{}", line).context(format!("Failed to write to {:?}", path))?;
    }
    Ok(())
}
