use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use common::{JobStatus, TaskCounts};
use reqwest::Client;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI simple para consultar al master")]
pub struct Cli {
    /// URL base del master
    #[arg(long, env = "MASTER_URL", default_value = "http://localhost:8080")]
    pub master_url: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Muestra fase y avance del job
    Status,
    /// Espera hasta que el job termine
    Wait {
        /// Segundos entre consultas
        #[arg(long, default_value_t = 2)]
        interval_secs: u64,
    },
}

async fn fetch_status(client: &Client, base_url: &str) -> Result<JobStatus> {
    let url = format!("{}/api/v1/job", base_url.trim_end_matches('/'));
    let resp = client.get(&url).send().await?;
    if !resp.status().is_success() {
        bail!("el master respondió {}", resp.status());
    }
    Ok(resp.json().await?)
}

fn format_counts(counts: &TaskCounts) -> String {
    format!(
        "{}/{} completas ({} en cola, {} corriendo)",
        counts.complete,
        counts.total(),
        counts.queued,
        counts.running
    )
}

fn print_status(status: &JobStatus) {
    println!("Job:");
    println!("  id: {}", status.job_id);
    println!("  fase: {:?}", status.phase);
    println!("  terminado: {}", status.done);
    println!("  map: {}", format_counts(&status.map_tasks));
    println!("  reduce: {}", format_counts(&status.reduce_tasks));
    println!(
        "  colas: {} listas, {} reintentos",
        status.ready_queue_len, status.retry_queue_len
    );
}

pub async fn run(cli: Cli) -> Result<()> {
    let client = Client::new();

    match cli.command {
        Commands::Status => {
            let status = fetch_status(&client, &cli.master_url).await?;
            print_status(&status);
        }
        Commands::Wait { interval_secs } => loop {
            let status = fetch_status(&client, &cli.master_url).await?;
            if status.done {
                print_status(&status);
                break;
            }
            println!(
                "fase {:?}: map {} | reduce {}",
                status.phase,
                format_counts(&status.map_tasks),
                format_counts(&status.reduce_tasks)
            );
            tokio::time::sleep(Duration::from_secs(interval_secs.max(1))).await;
        },
    }

    Ok(())
}
