use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory holding config.yaml and the catalog files
    #[clap(long, global = true, env = "CATALOG_SEARCH_BASE")]
    pub base_path: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP service
    Serve {
        /// Listen address, overrides server.bind
        #[clap(short, long)]
        bind: Option<String>,
    },

    /// Search the catalog and print the JSON response
    Search {
        query: String,

        /// Maximum number of results
        #[clap(short, long)]
        limit: Option<i64>,

        /// Minimum cosine similarity of vector matches [0.0, 1.0]
        #[clap(short, long)]
        min_similarity: Option<f32>,

        /// Only products of this category
        #[clap(short, long)]
        category: Option<String>,

        /// Only products of this brand
        #[clap(short, long)]
        brand: Option<String>,

        /// Record the search under this session
        #[clap(short, long)]
        session: Option<String>,
    },

    /// Generate missing embeddings
    Vectorize {
        /// Only these products. A single id uses the single-product path.
        #[clap(long = "id")]
        ids: Vec<u64>,

        /// Regenerate embeddings that are already up to date
        #[clap(short, long, default_value = "false")]
        force: bool,
    },

    /// Upsert products from a CSV file with an id,name,description,category,brand,status header
    Import { file: PathBuf },

    /// Print the logged searches of a session, newest first
    Interactions {
        session: String,

        #[clap(short, long)]
        limit: Option<usize>,
    },
}
