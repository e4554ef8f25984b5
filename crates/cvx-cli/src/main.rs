//! 🚀 cvx-cli: the front door of cvx.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Thin wrapper: parse args, set up logging, load config, hand the real work
//! to `cvx::Backend`, and print whatever comes back in a table. 🦆

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use cvx::Backend;
use cvx::documents::IndexableItem;
use cvx::query::{Condition, ConditionGroup, FacetRequest, SearchQuery, SortDirection};
use cvx::search::SearchResults;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Push documents into a cloud search source and query them back.
///
/// Credentials come from `CVX_REMOTE__ORGANIZATION_ID`, `CVX_REMOTE__SOURCE_ID` and
/// `CVX_REMOTE__API_KEY`, or from the `[remote]` table of the config file.
#[derive(Parser)]
#[command(name = "cvx", version)]
struct Cli {
    /// Path to a TOML config file. Env vars prefixed `CVX_` are always read.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the back-reference field in the remote schema. Safe to repeat.
    Provision,

    /// Index items from a newline-delimited JSON file, one item per line.
    Push {
        file: PathBuf,
    },

    /// Delete every document in the source.
    Clear,

    /// Run a search and print the hits and facets.
    Search {
        keywords: String,

        /// Facet field, optionally with a limit: `color` or `color:10`. Repeatable.
        #[arg(long = "facet")]
        facets: Vec<String>,

        /// Sort order `field:ASC` or `field:DESC`. Repeatable, first one wins ties.
        #[arg(long = "sort")]
        sorts: Vec<String>,

        /// Equality filter `field=value`, or `field!=value`. Repeatable, AND-ed together.
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// Don't ask the remote for a total count.
        #[arg(long)]
        skip_count: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 📡 logging first, so config failures have somewhere to go
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("connectivity failure")
                || cause_str.contains("error sending request")
                || cause_str.contains("Connection refused")
                || cause_str.contains("dns error")
                || cause_str.contains("Host unreachable")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: the search service isn't reachable. Check the push/platform base URLs \
                in your config, your proxy settings, and whether this machine can reach the \
                internet at all. Even clouds need a route to the ground sometimes. ☕"
            );
        }

        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    if let Some(path) = cli.config.as_deref() {
        let exists = path.try_exists().with_context(|| {
            format!("💀 Couldn't check whether the config file exists at '{}'", path.display())
        })?;
        if !exists {
            bail!(
                "💀 Config file '{}' doesn't exist. Relative paths resolve against the current directory.",
                path.display()
            );
        }
    }

    let app_config = cvx::load_config(cli.config.as_deref())
        .context("💀 In cvx-cli, we couldn't load the config. Check the file and the CVX_ env vars.")?;
    let backend = Backend::connect(app_config)?;

    match cli.command {
        Commands::Provision => {
            backend.provision().await?;
            println!("✅ provisioned");
        }
        Commands::Push { file } => {
            let items = read_items(&file).await?;
            let indexed = backend.index_items(&items).await?;
            println!("✅ pushed {} item(s)", indexed.len());
        }
        Commands::Clear => {
            backend.delete_all_items().await?;
            println!("🗑️ clear requested, the remote will catch up shortly");
        }
        Commands::Search {
            keywords,
            facets,
            sorts,
            filters,
            skip_count,
        } => {
            let query = build_query(keywords, &facets, &sorts, &filters, skip_count)?;
            let results = backend.search(&query).await?;
            print_results(&results);
        }
    }

    Ok(())
}

/// 📂 One `IndexableItem` per non-blank line.
async fn read_items(file: &Path) -> Result<Vec<IndexableItem>> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("💀 Couldn't read '{}'", file.display()))?;
    parse_items(&raw).with_context(|| format!("💀 '{}' isn't valid NDJSON", file.display()))
}

fn parse_items(raw: &str) -> Result<Vec<IndexableItem>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            serde_json::from_str::<IndexableItem>(line)
                .with_context(|| format!("line {} is not an item", number + 1))
        })
        .collect()
}

fn build_query(
    keywords: String,
    facets: &[String],
    sorts: &[String],
    filters: &[String],
    skip_count: bool,
) -> Result<SearchQuery> {
    let mut query = SearchQuery::new().keywords(keywords);

    for facet in facets {
        query = query.facet(match facet.split_once(':') {
            Some((field, limit)) => FacetRequest::new(field).with_limit(
                limit
                    .parse()
                    .with_context(|| format!("💀 facet limit in '{facet}' is not a number"))?,
            ),
            None => FacetRequest::new(facet.as_str()),
        });
    }

    for sort in sorts {
        let (field, direction) = match sort.split_once(':') {
            Some((field, direction)) => (field, direction.parse::<SortDirection>()?),
            None => (sort.as_str(), SortDirection::Ascending),
        };
        query = query.sort(field, direction);
    }

    let mut conditions = ConditionGroup::and();
    for filter in filters {
        let condition = if let Some((field, value)) = filter.split_once("!=") {
            Condition::not_equals(field, value)?
        } else if let Some((field, value)) = filter.split_once('=') {
            Condition::equals(field, value)?
        } else {
            bail!("💀 filter '{filter}' should look like field=value or field!=value");
        };
        conditions = conditions.with(condition);
    }
    query = query.filter(conditions);

    if skip_count {
        query = query.skip_result_count();
    }
    Ok(query)
}

fn print_results(results: &SearchResults) {
    if let Some(total) = results.result_count {
        info!("🔢 the remote reports {} matching document(s)", total);
        println!("Total: {total}");
    }

    let mut hits = Table::new();
    hits.set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Item", "Score"]);
    for item in &results.items {
        hits.add_row(vec![
            Cell::new(&item.item_id),
            Cell::new(format!("{:.2}", item.score)).set_alignment(CellAlignment::Right),
        ]);
    }
    println!("{hits}");

    if results.facets.is_empty() {
        return;
    }

    let mut facets = Table::new();
    facets
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Facet", "Value", "Count"]);
    for (field, buckets) in &results.facets {
        for bucket in buckets {
            facets.add_row(vec![
                Cell::new(field),
                Cell::new(&bucket.filter),
                Cell::new(bucket.count).set_alignment(CellAlignment::Right),
            ]);
        }
    }
    println!("{facets}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use cvx::query::ConditionNode;

    #[test]
    fn the_one_where_the_flags_become_a_query() -> Result<()> {
        let query = build_query(
            "alpha".to_string(),
            &["color:10".to_string(), "size".to_string()],
            &["created:DESC".to_string(), "title".to_string()],
            &["type=article".to_string(), "status!=draft".to_string()],
            true,
        )?;

        assert_eq!(query.keywords.as_deref(), Some("alpha"));
        assert_eq!(query.facets, vec![FacetRequest::new("color").with_limit(10), FacetRequest::new("size")]);
        assert_eq!(
            query.sorts,
            vec![
                ("created".to_string(), SortDirection::Descending),
                ("title".to_string(), SortDirection::Ascending)
            ]
        );
        assert_eq!(query.conditions.children().len(), 2);
        assert!(matches!(
            &query.conditions.children()[1],
            ConditionNode::Leaf(c) if c.field() == "status"
        ));
        assert!(query.skip_result_count);
        Ok(())
    }

    #[test]
    fn the_one_where_a_filter_without_an_operator_is_refused() {
        assert!(build_query("x".to_string(), &[], &[], &["oops".to_string()], false).is_err());
        assert!(build_query("x".to_string(), &[], &["t:UP".to_string()], &[], false).is_err());
    }

    #[test]
    fn the_one_where_ndjson_skips_blank_lines_and_names_bad_ones() {
        let good = "{\"item_id\":\"entity:node/1:en\",\"fields\":[]}\n\n{\"item_id\":\"entity:node/2:en\",\"fields\":[]}\n";
        let items = parse_items(good).expect("two good lines");
        assert_eq!(items.len(), 2);

        let bad = "{\"item_id\":\"a\",\"fields\":[]}\nnot json\n";
        let err = parse_items(bad).expect_err("line 2 is garbage");
        assert!(err.to_string().contains("line 2"));
    }
}
