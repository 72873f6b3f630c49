//! `conductor plan`: validate and print the start order

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use std::collections::HashMap;
use tabled::{Table, Tabled};

use conductor_core::application::Supervisor;
use conductor_core::domain::ServiceSpec;

use crate::config::ConductorConfig;

/// One service in start order
#[derive(Debug, Serialize)]
pub struct PlanStep {
    pub step: usize,
    pub service: String,
    pub command: String,
    pub depends_on: Vec<String>,
    pub readiness: String,
    pub log_path: String,
}

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    step: usize,
    service: String,
    command: String,
    depends_on: String,
    readiness: String,
    log: String,
}

impl From<&PlanStep> for PlanRow {
    fn from(step: &PlanStep) -> Self {
        Self {
            step: step.step,
            service: step.service.clone(),
            command: step.command.clone(),
            depends_on: if step.depends_on.is_empty() {
                "-".to_string()
            } else {
                step.depends_on.join(", ")
            },
            readiness: step.readiness.clone(),
            log: step.log_path.clone(),
        }
    }
}

pub fn build_plan(specs: &[ServiceSpec]) -> Result<Vec<PlanStep>> {
    let order = Supervisor::start_order(specs)?;
    let by_name: HashMap<&str, &ServiceSpec> = specs.iter().map(|s| (s.name.as_str(), s)).collect();

    Ok(order
        .iter()
        .filter_map(|name| by_name.get(name.as_str()))
        .enumerate()
        .map(|(i, spec)| PlanStep {
            step: i + 1,
            service: spec.name.clone(),
            command: std::iter::once(spec.command.as_str())
                .chain(spec.args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" "),
            depends_on: spec.depends_on.clone(),
            readiness: spec.readiness.to_string(),
            log_path: spec.log_path.display().to_string(),
        })
        .collect())
}

pub fn plan(config: &ConductorConfig, json: bool) -> Result<()> {
    let steps = build_plan(&config.services)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&steps)?);
        return Ok(());
    }

    println!("{}", format!("✓ {} services, start order:", steps.len()).green().bold());
    println!();
    let rows: Vec<PlanRow> = steps.iter().map(PlanRow::from).collect();
    println!("{}", Table::new(rows));
    Ok(())
}
