use clap::ValueEnum;
use colored::Colorize;
use tabled::{
    builder::Builder,
    settings::{object::Rows, Alignment, Modify, Style},
};

use crate::models::{Outcome, RunSummary};
use crate::resolve::{Plan, PlanEntry, Strategy};

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

pub fn print_plan_table(plan: &Plan) {
    println!("\n{}", "Mirror Plan".bold().underline());
    println!(
        "Target: {}",
        plan.target.reference("<repo>", "<tag>").bright_cyan()
    );

    let mut builder = Builder::default();
    builder.push_record(["#", "Source", "Destination", "Name"]);

    for (i, entry) in plan.entries.iter().enumerate() {
        match entry {
            PlanEntry::Resolved(item) => {
                let name = match item.strategy {
                    Strategy::Short => "short".to_string(),
                    Strategy::Flattened => "flattened".yellow().to_string(),
                };
                builder.push_record([
                    (i + 1).to_string().as_str(),
                    item.source.as_str(),
                    item.destination.as_str(),
                    name.as_str(),
                ]);
            }
            PlanEntry::Unresolved { raw, reason } => {
                let note = format!("skipped: {}", reason).dimmed().to_string();
                builder.push_record([
                    (i + 1).to_string().as_str(),
                    raw.as_str(),
                    note.as_str(),
                    "—",
                ]);
            }
        }
    }

    let mut table = builder.build();
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("{}", table);

    let conflicted: Vec<&str> = plan.table.conflicted_keys().collect();
    if conflicted.is_empty() {
        println!("{}", "No name conflicts".green());
    } else {
        println!(
            "{}",
            format!(
                "⚠️  {} conflicting name(s): {}",
                conflicted.len(),
                conflicted.join(", ")
            )
            .yellow()
        );
    }

    for collision in &plan.residual_collisions {
        println!(
            "{}",
            format!(
                "❌ {} is still shared by: {}",
                collision.destination,
                collision.sources.join(", ")
            )
            .red()
        );
    }
}

pub fn print_summary(summary: &RunSummary) {
    println!("\n{}", "Mirror Summary".bold().underline());

    let mut builder = Builder::default();
    builder.push_record(["Source", "Destination", "Result"]);

    for item in &summary.items {
        let result = match item.outcome {
            Outcome::Copied => "✅ copied".green().to_string(),
            Outcome::Failed(ref failure) => format!("❌ {}", failure).red().to_string(),
            ref skipped => skipped.kind().dimmed().to_string(),
        };
        builder.push_record([
            item.source.as_str(),
            item.destination.as_deref().unwrap_or("—"),
            result.as_str(),
        ]);
    }

    let mut table = builder.build();
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("{}\n", table);

    let line = format!(
        "Copied {}, skipped {}, failed {}",
        summary.copied, summary.skipped, summary.failed
    );
    if summary.failed > 0 {
        println!("{}", line.red().bold());
    } else {
        println!("{}", line.green().bold());
    }

    if let Some(code) = summary.aborted_with {
        println!(
            "{}",
            format!("Stopped early after a failure (exit code {})", code).red()
        );
    }
}
