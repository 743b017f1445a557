//! Teardown command

use anyhow::Result;
use bench_lib::ProcessKind;

use super::AppContext;
use crate::output::{print_info, print_json, print_success, OutputFormat};

/// Retract forwarding, then stop and destroy the process
pub async fn teardown(ctx: &AppContext, process: ProcessKind, format: OutputFormat) -> Result<()> {
    let provisioner = ctx.provisioner();
    let report = provisioner.teardown(process).await;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            if !report.was_running {
                print_info("Container was not running; no forwarding rules to retract");
            } else {
                print_info(&format!("Retracted {} forwarding rule(s)", report.rules_removed));
            }
            print_success(&format!(
                "Destroyed {} on {}",
                provisioner.config().spec(process).name,
                ctx.backend
            ));
        }
    }

    Ok(())
}
