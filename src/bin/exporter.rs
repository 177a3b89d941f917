use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use shoprank::catalog::CatalogStore;

#[derive(Parser, Debug)]
#[command(
    name = "shoprank-exporter",
    about = "Dumps catalog, order, and shop data from Postgres to CSV for training"
)]
struct ExportCli {
    /// Postgres connection string (postgres://...).
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Directory the CSV files are written to.
    #[arg(long, env = "SHOPRANK_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ExportCli::parse();
    fs::create_dir_all(&cli.data_dir)
        .with_context(|| format!("failed to create {}", cli.data_dir.display()))?;

    let store = CatalogStore::connect(&cli.database_url).await?;

    eprintln!("exporting products...");
    let products = store.all_products().await?;
    write_csv(&cli.data_dir.join("products.csv"), &products)?;
    eprintln!("saved {} products to products.csv", products.len());

    eprintln!("exporting order history...");
    let orders = store.order_history().await?;
    write_csv(&cli.data_dir.join("order_history.csv"), &orders)?;
    eprintln!("saved {} order records to order_history.csv", orders.len());

    eprintln!("exporting shops...");
    let shops = store.all_shops().await?;
    write_csv(&cli.data_dir.join("shops.csv"), &shops)?;
    eprintln!("saved {} shops to shops.csv", shops.len());

    eprintln!("export complete.");
    Ok(())
}

fn write_csv<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for record in records {
        writer
            .serialize(record)
            .with_context(|| format!("failed to write a row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}
