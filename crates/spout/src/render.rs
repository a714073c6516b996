//! Terminal output for the spout CLI.
//!
//! Skill output is the only thing written to stdout by `run`; timing and
//! warnings go to stderr so output can be piped.

use spout_core::ExecutionResult;
use spout_engine::backends::BackendKind;
use spout_engine::engine::PreparedPrompt;
use spout_engine::suite::SuiteReport;
use spout_engine::SkillEntry;
use std::path::PathBuf;

pub fn print_output(result: &ExecutionResult) {
    println!("{}", result.output);
}

/// Print duration and token accounting to stderr.
pub fn print_timing(result: &ExecutionResult) {
    eprintln!(
        "{} via {} in {:.3}s ({} in / {} out tokens)",
        result.qualified_name,
        result.model,
        result.duration.as_secs_f64(),
        result.input_tokens,
        result.output_tokens,
    );
}

/// Print a rendered prompt with the skill details around it.
pub fn print_prepared(
    prepared: &PreparedPrompt,
    model: &str,
    backend: BackendKind,
    unresolved: &[&str],
) {
    let skill = &prepared.skill;
    println!("Skill:    {} ({})", skill.qualified_name(), skill.tier.as_str());
    println!("Path:     {}", skill.path.display());
    if let Some(ref description) = skill.description {
        println!("About:    {}", description);
    }
    println!("Model:    {} ({})", model, backend);

    if !skill.execution_settings.is_empty() {
        println!("Settings:");
        for (key, value) in skill.execution_settings.iter() {
            println!("  {:<20} {}", key, value);
        }
    }

    println!();
    println!("{}", prepared.prompt);

    if !unresolved.is_empty() {
        eprintln!();
        eprintln!("warning: unresolved placeholders: {}", unresolved.join(", "));
    }
}

/// Print categories found across skill roots.
pub fn print_categories(categories: &[(String, String)], roots: &[PathBuf]) {
    if categories.is_empty() {
        println!("No skills found.");
        println!("Searched:");
        for root in roots {
            println!("  {}", root.display());
        }
        return;
    }

    println!("{:<24}  {:<20}", "CATEGORY", "PREFERRED SKILL");
    println!("{}", "-".repeat(46));
    for (category, preferred) in categories {
        println!("{:<24}  {:<20}", truncate(category, 24), truncate(preferred, 20));
    }

    println!();
    println!("{} categories", categories.len());
}

/// Print the skills of one category with the tier resolution would pick.
pub fn print_skills(category: &str, skills: &[SkillEntry]) {
    if skills.is_empty() {
        println!("No skills found for category {category}.");
        return;
    }

    println!("{:<20}  {:<10}  {:<28}  PATH", "SKILL", "TIER", "QUALIFIED");
    println!("{}", "-".repeat(90));
    for entry in skills {
        println!(
            "{:<20}  {:<10}  {:<28}  {}",
            truncate(&entry.name, 20),
            entry.tier.as_str(),
            truncate(&entry.qualified_name(), 28),
            entry.path.display(),
        );
    }

    println!();
    println!("{} skill(s)", skills.len());
}

/// Print one line per test case and a summary.
pub fn print_suite_report(report: &SuiteReport) {
    println!(
        "Category: {}  Model: {}  Started: {}",
        report.category,
        report.model,
        report.started_at.format("%Y-%m-%d %H:%M:%S"),
    );
    println!();

    for outcome in &report.outcomes {
        let status = if outcome.passed { "PASS" } else { "FAIL" };
        println!(
            "  {:<4}  {:<32}  {:>8.3}s",
            status,
            truncate(&outcome.case.name, 32),
            outcome.duration.as_secs_f64(),
        );
        if !outcome.passed {
            println!("        expected: {}", outcome.case.expected_pattern);
            println!("        got:      {}", truncate(first_line(&outcome.detail), 70));
        }
    }

    println!();
    println!(
        "{} passed, {} failed, {} total",
        report.passed(),
        report.failed(),
        report.outcomes.len()
    );
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or_default()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
