// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// powgate-solver CLI
//
//   mine     solve one challenge given on the command line
//   stdio    newline-delimited JSON requests on stdin, replies on stdout
//   request  fetch a URL through a powgate gateway
//
// Logs go to stderr so stdout stays machine readable.

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use powgate_solver::client::DEFAULT_ATTEMPTS;
use powgate_solver::{solve, GatewayClient, MineReply, MineRequest, MiningWorker};

#[derive(Parser)]
#[command(name = "powgate-solver", version, about = "Proof-of-work solver for powgate challenges")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Solve a single challenge and print the reply
    Mine {
        #[arg(long)]
        difficulty: u64,

        /// Request path the challenge is bound to
        #[arg(long)]
        path: String,

        /// Anchor (64 hex characters)
        #[arg(long)]
        current: String,

        /// Challenge timestamp (Unix seconds)
        #[arg(long)]
        timestamp: u64,
    },

    /// Serve mining requests over stdin/stdout
    Stdio,

    /// GET a URL, solving challenges as needed
    Request {
        url: String,

        /// Requests to make before giving up
        #[arg(long, default_value_t = DEFAULT_ATTEMPTS)]
        attempts: usize,

        /// Grant from an earlier run
        #[arg(long, env = "POWGATE_GRANT")]
        grant: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Mine {
            difficulty,
            path,
            current,
            timestamp,
        } => {
            let request = MineRequest {
                difficulty,
                path,
                current,
                timestamp,
            };
            let result = tokio::task::spawn_blocking(move || solve(&request)).await?;
            let failed = result.is_err();
            println!("{}", serde_json::to_string(&MineReply::from(result))?);
            if failed {
                std::process::exit(1);
            }
        }
        Command::Stdio => serve_stdio().await?,
        Command::Request { url, attempts, grant } => {
            let mut client = GatewayClient::new(attempts)?.with_grant(grant);
            let fetched = client.fetch(&url).await?;
            info!(status = %fetched.status, solved = fetched.solved, "request complete");
            if let Some(grant) = &fetched.grant {
                eprintln!("{}: {}", powgate_common::wire::HEADER_GRANT, grant);
            }
            println!("{}", fetched.body);
        }
    }

    Ok(())
}

/// One reply line per request line. A new request cancels the one in flight.
async fn serve_stdio() -> anyhow::Result<()> {
    let (mut worker, mut replies) = MiningWorker::spawn()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut pending = 0usize;
    let mut input_open = true;

    while input_open || pending > 0 {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => match serde_json::from_str::<MineRequest>(&line) {
                        Ok(request) => {
                            worker.submit(request)?;
                            pending += 1;
                        }
                        Err(e) => {
                            warn!(error = %e, "unreadable request");
                            write_reply(&mut stdout, &MineReply::Err(format!("invalid request: {e}"))).await?;
                        }
                    },
                    None => input_open = false,
                }
            }
            reply = replies.recv() => {
                let Some(reply) = reply else { break };
                pending = pending.saturating_sub(1);
                write_reply(&mut stdout, &reply.reply).await?;
            }
        }
    }

    Ok(())
}

async fn write_reply(stdout: &mut tokio::io::Stdout, reply: &MineReply) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(reply)?;
    line.push(b'\n');
    stdout.write_all(&line).await?;
    stdout.flush().await?;
    Ok(())
}
