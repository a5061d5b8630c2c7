use switchboard_core::Config;
use switchboard_supervisor::{AgentRegistry, HealthChecker};

use super::agent_summary;

pub fn list(config: &Config) -> anyhow::Result<()> {
    let registry = AgentRegistry::from_configs(&config.agents)?;

    println!();
    println!("Registered agents ({})", registry.len());
    println!();
    for agent in registry.all() {
        let summary = agent_summary(agent);
        println!(
            "  {:<28} {:<6} {}",
            agent.name,
            agent.kind(),
            summary["target"].as_str().unwrap_or_default()
        );
        if !agent.description.is_empty() {
            println!("      {}", agent.description);
        }
        if !agent.intents.is_empty() {
            println!("      intents:  {}", agent.intents.join(", "));
        }
        if !agent.keywords.is_empty() {
            println!("      keywords: {}", agent.keywords.join(", "));
        }
    }
    Ok(())
}

pub async fn check(config: &Config) -> anyhow::Result<()> {
    let registry = AgentRegistry::from_configs(&config.agents)?;
    let report = HealthChecker::check_all(&registry, &config.network).await;

    println!();
    for health in &report {
        let icon = if health.healthy { "✓" } else { "✗" };
        println!(
            "  {} {:<28} {:>6} ms  {}",
            icon, health.name, health.latency_ms, health.detail
        );
    }

    let unhealthy = report.iter().filter(|h| !h.healthy).count();
    println!();
    if unhealthy > 0 {
        anyhow::bail!("{} of {} agent(s) unhealthy", unhealthy, report.len());
    }
    println!("All {} agent(s) healthy", report.len());
    Ok(())
}
