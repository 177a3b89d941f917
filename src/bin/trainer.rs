use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use shoprank::catalog::CatalogItem;
use shoprank::index::CatalogIndex;
use shoprank::snapshot;

#[derive(Parser, Debug)]
#[command(
    name = "shoprank-trainer",
    about = "Fits the catalog vectorizer from exported CSV data and writes the snapshot artifacts"
)]
struct TrainCli {
    /// Directory containing the exported CSV data.
    #[arg(long, env = "SHOPRANK_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Directory the snapshot artifacts are written to.
    #[arg(long, env = "SHOPRANK_MODELS_DIR", default_value = "data/models")]
    models_dir: PathBuf,
}

fn main() -> Result<()> {
    let cli = TrainCli::parse();
    let products_csv = cli.data_dir.join("products.csv");
    if !products_csv.is_file() {
        bail!(
            "{} not found; run the exporter first",
            products_csv.display()
        );
    }

    eprintln!("loading products from {}...", products_csv.display());
    let items = read_products(&products_csv)?;
    if items.is_empty() {
        bail!("{} contains no products", products_csv.display());
    }

    eprintln!("fitting vectorizer over {} products...", items.len());
    let index = CatalogIndex::build(items).context("failed to fit the catalog vectorizer")?;

    snapshot::save(
        &cli.models_dir,
        &index.vectorizer().state(),
        index.all_items(),
        index.all_vectors(),
    )
    .with_context(|| format!("failed to write snapshot to {}", cli.models_dir.display()))?;

    eprintln!(
        "training complete: {} products, {} vocabulary terms.",
        index.len(),
        index.vectorizer().dimension()
    );
    eprintln!("artifacts in {}:", cli.models_dir.display());
    eprintln!("- {}", snapshot::VECTORIZER_FILE);
    eprintln!("- {}", snapshot::ITEMS_FILE);
    eprintln!("- {}", snapshot::VECTORS_FILE);
    Ok(())
}

fn read_products(path: &Path) -> Result<Vec<CatalogItem>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut items = Vec::new();
    for (row_no, record) in reader.deserialize::<CatalogItem>().enumerate() {
        let item = record.with_context(|| format!("invalid product row {}", row_no + 1))?;
        items.push(item);
    }
    Ok(items)
}
