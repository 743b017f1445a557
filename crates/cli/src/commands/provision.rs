//! Provisioning command

use anyhow::{Context, Result};
use bench_lib::ProcessKind;
use colored::Colorize;

use super::AppContext;
use crate::output::{color_rules, print_info, print_json, print_success, print_warning, OutputFormat};

/// Bring the process up and print where it can be reached
pub async fn provision(
    ctx: &AppContext,
    process: ProcessKind,
    cores: u32,
    format: OutputFormat,
) -> Result<()> {
    if cores == 0 {
        anyhow::bail!("--cores must be at least 1");
    }

    let provisioner = ctx.provisioner();
    let spec = provisioner.config().spec(process).clone();

    if matches!(format, OutputFormat::Table) {
        print_info(&format!(
            "Provisioning {} on {} as {} ({} core(s))",
            process.label(),
            ctx.backend,
            spec.name.cyan(),
            cores
        ));
    }

    let provisioned = provisioner
        .provision(process, cores)
        .await
        .with_context(|| format!("Failed to provision {} on {}", spec.name, ctx.backend))?;

    match format {
        OutputFormat::Json => print_json(&provisioned)?,
        OutputFormat::Table => {
            if let Some(address) = provisioned.process.address {
                println!("Container address:      {}", address);
            }
            println!(
                "Ports:                  {} -> {}",
                provisioned.mapping.host_port, provisioned.mapping.container_port
            );
            println!(
                "Forwarding rules:       {}",
                color_rules(
                    provisioned.rules_inserted,
                    provisioned.rules_present,
                    provisioned.rules_failed
                )
            );
            if provisioned.rules_failed > 0 {
                print_warning("Some forwarding rules could not be installed; the endpoint may be unreachable");
            }
            print_success(&format!(
                "{} reachable at {}",
                process.label(),
                provisioned.endpoint.to_string().green().bold()
            ));
            if ctx.dry_run {
                print_warning("Dry run: no command was executed");
            }
        }
    }

    Ok(())
}
