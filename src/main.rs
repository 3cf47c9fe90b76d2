// src/main.rs

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use sibyl::agent::{Workflow, WorkflowLimits};
use sibyl::config::CONFIG;
use sibyl::db::Database;
use sibyl::llm::{Backoff, GeminiClient, TextModel};
use sibyl::schema::{EmbeddingClient, SchemaProvider};
use sibyl::server::{self, AppState};

#[derive(Parser)]
#[command(name = "sibyl", about = "Ask a relational database questions in plain language")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API server
    Serve,
    /// Answer one question and exit
    Ask {
        /// The natural language question
        question: String,
        /// Show the reasoning steps
        #[arg(long)]
        details: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    info!("Starting sibyl");
    info!("Database: {}", CONFIG.database_path);
    info!("Model: {}", CONFIG.gemini_model);

    let db = Database::connect(
        &CONFIG.database_path,
        CONFIG.sqlite_max_connections,
        CONFIG.max_result_rows,
    )
    .await?;

    let mut schema = SchemaProvider::load(db.clone()).await?;
    info!("Loaded schema: {} tables", schema.table_names().len());

    let embedder = EmbeddingClient::new(
        CONFIG.gemini_api_key.clone(),
        CONFIG.gemini_base_url.clone(),
        CONFIG.embedding_model.clone(),
    );
    if embedder.is_available() {
        match schema.attach_index(embedder, CONFIG.schema_top_k).await {
            Ok(()) => info!("Schema similarity index ready"),
            Err(e) => warn!("Schema index unavailable, falling back to ranking: {e}"),
        }
    } else {
        info!("No API key configured; schema index disabled");
    }
    let schema = Arc::new(schema);

    let model: Arc<dyn TextModel> = Arc::new(Backoff::new(
        GeminiClient::new(
            CONFIG.gemini_api_key.clone(),
            CONFIG.gemini_base_url.clone(),
            CONFIG.gemini_model.clone(),
            CONFIG.llm_timeout_secs,
        ),
        CONFIG.llm_max_retries,
    ));
    let model_name = model.name();

    let workflow = Arc::new(
        Workflow::new(model, db, schema.clone()).with_limits(WorkflowLimits {
            max_sql_retries: CONFIG.max_sql_retries,
            max_chart_points: CONFIG.max_chart_points,
            explore_entity_cap: CONFIG.explore_entity_cap,
            lookup_value_limit: CONFIG.lookup_value_limit,
        }),
    );

    match cli.command {
        Command::Serve => {
            let state = AppState {
                workflow,
                schema,
                model_name,
            };
            server::run(&CONFIG.host, CONFIG.port, state).await
        }
        Command::Ask { question, details } => {
            let session = workflow.run(question).await;

            if details {
                for log in &session.logs {
                    println!("\n[{}]\n{}", log.title, log.content);
                }
            }

            if let Some(results) = &session.results {
                println!("\n{}", results.columns.join(" | "));
                for row in &results.rows {
                    let cells: Vec<String> = row
                        .iter()
                        .map(|v| match v {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect();
                    println!("{}", cells.join(" | "));
                }
            }
            if let Some(answer) = &session.final_answer {
                println!("\n{answer}");
            }
            if let Some(error) = &session.error {
                eprintln!("\nFailed: {error}");
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
