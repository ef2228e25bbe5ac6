mod cli;

use clap::Parser;
use eyre::WrapErr;
use tracing::info;

use entwine_core::chain::ProgressFn;
use entwine_core::dump::DumpFormat;
use entwine_core::entities::{compute_entities, EntityOptions};
use entwine_core::export::{export_flows, export_range, ExportOptions};
use entwine_core::rpc::{BitcoinRpc, HttpRpcClient};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_level(true)
        .init();

    match args.command {
        cli::Command::Export {
            from,
            to,
            out,
            plain_header,
            no_separate_header,
            no_dedup_tx,
            delimiter,
        } => {
            let rpc = connect(&args.rpc).await?;
            let opts = ExportOptions {
                start: from,
                end: to,
                out_dir: out.unwrap_or_else(|| format!("blocks_{from}_{to}").into()),
                format: DumpFormat {
                    delimiter: delimiter as u8,
                    plain_header,
                    separate_header: !no_separate_header,
                },
                dedup_transactions: !no_dedup_tx,
            };

            let summary = export_range(&rpc, &opts, Some(progress_observer()))
                .await
                .wrap_err("export failed")?;
            info!(
                blocks = summary.blocks,
                transactions = summary.transactions,
                unresolved_inputs = summary.unresolved_inputs,
                "export finished"
            );
        }

        cli::Command::ExportFlows {
            from,
            to,
            out,
            delimiter,
        } => {
            let rpc = connect(&args.rpc).await?;
            let rows = export_flows(&rpc, from, to, &out, delimiter as u8, Some(progress_observer()))
                .await
                .wrap_err("flow export failed")?;
            info!(rows, out = %out.display(), "flow export finished");
        }

        cli::Command::ComputeEntities {
            input,
            sort_input,
            cluster_output_addresses,
            no_separate_header,
            delimiter,
        } => {
            let opts = EntityOptions {
                delimiter: delimiter as u8,
                sort_input,
                cluster_output_addresses,
                separate_headers: !no_separate_header,
            };
            let summary =
                compute_entities(&input, &opts).wrap_err("entity computation failed")?;
            info!(
                addresses = summary.addresses,
                input_rows = summary.input_rows,
                entities = summary.entities,
                "entity computation finished"
            );
        }
    }

    Ok(())
}

/// Build the RPC client and verify the connection before doing any work.
async fn connect(args: &cli::RpcArgs) -> eyre::Result<HttpRpcClient> {
    let rpc = HttpRpcClient::new(
        &args.rpc_url,
        args.rpc_user.as_deref(),
        args.rpc_pass.as_deref(),
        args.rpc_cookie_file.as_deref(),
        args.rpc_rps,
        args.rpc_batch_size,
    )
    .wrap_err("invalid RPC configuration")?;

    let tip = rpc
        .get_block_count()
        .await
        .wrap_err_with(|| format!("could not connect to Bitcoin Core RPC at `{}`", args.rpc_url))?;
    info!(tip, url = %args.rpc_url, "connected to Bitcoin Core");

    Ok(rpc)
}

/// Progress reporting to standard error, once per percentage point.
fn progress_observer() -> ProgressFn {
    Box::new(|fraction| {
        info!(percent = (fraction * 100.0).round() as u64, "progress");
    })
}
