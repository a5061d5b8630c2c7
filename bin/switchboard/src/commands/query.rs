use switchboard_core::Config;
use switchboard_supervisor::{value_text, QueryRequest, Supervisor};

pub async fn run(
    config: &Config,
    text: &str,
    user: Option<String>,
    debug: bool,
    json: bool,
) -> anyhow::Result<()> {
    let supervisor = Supervisor::from_config(config)?;
    let mut request = QueryRequest::new(text);
    request.user_id = user;
    request.options.debug = debug;

    let response = supervisor.handle(request).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("{}", response.answer);

        if !response.used_agents.is_empty() {
            println!();
            println!("Agents:");
            for used in &response.used_agents {
                println!("  {:<28} {:<28} {}", used.name, used.intent, used.status);
            }
        }

        if let Some(steps) = &response.intermediate_results {
            println!();
            println!("Steps:");
            for (step_id, step) in steps {
                let detail = match (step.output(), step.error()) {
                    (Some(output), _) => value_text(&output.result),
                    (_, Some(err)) => format!("{}: {}", err.kind, err.message),
                    _ => String::new(),
                };
                println!("  [{}] {} {} {}", step_id, step.agent_name, step.status(), detail);
            }
        }
    }

    if let Some(err) = response.error {
        anyhow::bail!("{}: {}", err.kind, err.message);
    }
    Ok(())
}
