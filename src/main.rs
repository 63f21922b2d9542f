use clap::Parser;
use tracing_subscriber::EnvFilter;

mod app;
mod auth;
mod catalog;
mod cli;
mod config;
mod eid;
mod embeddings;
mod rate_limit;
mod search;
#[cfg(test)]
mod tests;
mod vector;
mod vectorize;
mod web;

use app::AppFactory;
use cli::Command;
use config::Config;
use search::SearchRequest;
use vectorize::VectorizeOptions;

fn init_logging() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new("info")
    };

    // stdout carries command output
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(args: cli::Args) -> anyhow::Result<()> {
    let base_path = AppFactory::base_path(args.base_path);
    let config = Config::load_with(&base_path)?;
    let bind = config.server.bind.clone();
    let app = AppFactory::create(config)?;

    match args.command {
        Command::Serve { bind: bind_override } => {
            web::start_daemon(app, bind_override.as_deref().unwrap_or(&bind)).await?;
        }

        Command::Search {
            query,
            limit,
            min_similarity,
            category,
            brand,
            session,
        } => {
            let response = app
                .search(&SearchRequest {
                    query,
                    limit,
                    min_similarity,
                    category,
                    brand,
                    session_id: session,
                })
                .await?;
            print_json(&response)?;
        }

        Command::Vectorize { ids, force } => {
            if ids.len() == 1 {
                print_json(&app.vectorize_product(ids[0], force).await?)?;
            } else {
                let options = VectorizeOptions {
                    ids: (!ids.is_empty()).then_some(ids),
                    force,
                };
                print_json(&app.vectorize_batch(options).await?)?;
            }
        }

        Command::Import { file } => {
            let count = app.import_products(&file).await?;
            println!("{count} products imported");
        }

        Command::Interactions { session, limit } => {
            print_json(&app.interactions(&session, limit).await?)?;
        }
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(args))
}
