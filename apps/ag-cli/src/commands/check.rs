// check.rs — `ag check`: evaluate an operation against the active rules.

use ag_gateway::Gateway;
use ag_policy::Decision;

use super::session;
use crate::exit::Outcome;

pub fn execute(
    gateway: &Gateway,
    operation: &str,
    target: &str,
    explain: bool,
) -> anyhow::Result<Outcome> {
    let session_id = session(gateway)?;

    let result = if explain {
        let trace = gateway.explain(&session_id, operation, target)?;
        println!("Normalized target: {}", trace.normalized_target);
        println!("{:<32} {:<6} {:<4} {:<6} DECIDED", "RULE", "ACTION", "OP", "TARGET");
        println!("{}", "-".repeat(64));
        for step in &trace.steps {
            println!(
                "{:<32} {:<6} {:<4} {:<6} {}",
                step.rule_id,
                step.action.to_string(),
                mark(step.operation_matched),
                mark(step.target_matched),
                if step.terminal { "<-" } else { "" },
            );
        }
        if trace.default_applied {
            println!("No rule matched; default policy applied.");
        }
        println!();
        trace.result
    } else {
        gateway.check(&session_id, operation, target)?
    };

    println!(
        "{}: {} {} (rule {}, rule set v{})",
        result.decision.to_string().to_uppercase(),
        operation,
        target,
        result.rule_id(),
        result.ruleset_version
    );
    println!("  {}", result.rationale);

    Ok(match result.decision {
        Decision::Allow => Outcome::Success,
        Decision::Deny => Outcome::PolicyDenied,
    })
}

fn mark(matched: bool) -> &'static str {
    if matched {
        "yes"
    } else {
        "no"
    }
}
