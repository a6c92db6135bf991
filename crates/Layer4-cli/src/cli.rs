//! One-shot CLI commands

use std::time::Duration;
use tether_engine::Engine;
use tether_foundation::{InputValues, TRUNCATION_NOTICE};

/// Exit code when the wait runs out before the task settles
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Parse `name=value`
pub fn parse_input(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid input '{}': expected name=value", s))?;
    if name.is_empty() {
        return Err(format!("invalid input '{}': empty name", s));
    }
    Ok((name.to_string(), value.to_string()))
}

/// Print the catalog
pub fn list_definitions(engine: &Engine) {
    let catalog = engine.catalog();

    if catalog.tasks.is_empty() && catalog.configurations.is_empty() {
        println!("No definitions found in .tether/tasks.json");
        return;
    }

    if !catalog.tasks.is_empty() {
        println!("Tasks");
        for task in &catalog.tasks {
            let mut flags = Vec::new();
            if task.background {
                flags.push("background");
            }
            if task.interactive {
                flags.push("interactive");
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };
            println!("  {:<24} {}{}", task.label, truncate(&task.command, 60), flags);
        }
    }

    if !catalog.configurations.is_empty() {
        println!("Debug configurations");
        for config in &catalog.configurations {
            println!(
                "  {:<24} {} ({})",
                config.name,
                config.adapter_type,
                config.request.command()
            );
        }
    }
}

/// Run a task to completion; returns the process exit code to use
pub async fn run_once(
    engine: &Engine,
    label: &str,
    inputs: InputValues,
    timeout_ms: Option<u64>,
) -> anyhow::Result<i32> {
    let execution = engine.run_task(label, &inputs).await?;
    tracing::debug!(id = %execution.id, "waiting for {}", label);

    let result = engine
        .await_task(&execution.id, timeout_ms.map(Duration::from_millis))
        .await?;

    if !result.execution.interactive {
        let output = engine.task_output(&execution.id).await?;
        print!("{}", output.content);
        if output.truncated {
            eprintln!("{}", TRUNCATION_NOTICE.trim_start());
        }
    }

    if result.timed_out {
        eprintln!(
            "Task '{}' still running after {} ms; cancelling",
            label,
            timeout_ms.unwrap_or(engine.config().default_await_timeout_ms)
        );
        engine.shutdown().await;
        return Ok(TIMEOUT_EXIT_CODE);
    }

    Ok(result.execution.exit_code.unwrap_or(if result.success { 0 } else { 1 }))
}

/// Truncate a string for display
fn truncate(s: &str, max_len: usize) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= max_len {
        s
    } else {
        let cut: String = s.chars().take(max_len).collect();
        format!("{}...", cut)
    }
}
