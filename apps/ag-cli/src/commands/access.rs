// access.rs — Sessions, operator accounts and access policies.

use ag_gateway::Gateway;
use ag_rbac::{Credentials, PolicyContext, Role};
use clap::Subcommand;
use serde_json::Value;

use super::{clear_session, read_password, save_session, session};
use crate::exit::Outcome;

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create an operator account (password from prompt or stdin).
    Add {
        username: String,
        /// viewer, operator, administrator, system_admin, ai_agent or
        /// security_auditor.
        #[arg(long, default_value = "viewer")]
        role: String,
    },
    /// Disable an account and end its sessions.
    Deactivate { username: String },
    /// List operator accounts.
    List,
    /// Account details and recent activity of a user.
    Show {
        username: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// List the named access policies.
    List,
    /// Ask whether a policy grants the current session a resource.
    Eval {
        name: String,
        resource: String,
        /// Request attribute as key=value; repeatable. JSON values such as
        /// `true` or `3600` are parsed, anything else is a string.
        #[arg(long = "attr", value_parser = parse_attribute)]
        attrs: Vec<(String, Value)>,
    },
}

fn parse_attribute(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("attribute name is empty".to_string());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

pub fn login(gateway: &Gateway, username: &str) -> anyhow::Result<Outcome> {
    let password = read_password("Password: ")?;
    let session = gateway.login(&Credentials::new(username, password))?;
    save_session(&gateway.config().session_file, &session.id)?;
    println!(
        "Logged in as {} ({}), session expires {}",
        session.user,
        session.role,
        session.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(Outcome::Success)
}

pub fn logout(gateway: &Gateway) -> anyhow::Result<Outcome> {
    let path = &gateway.config().session_file;
    match session(gateway) {
        Ok(id) => {
            if gateway.logout(&id)? {
                println!("Logged out.");
            } else {
                println!("Session had already ended.");
            }
        }
        Err(_) => println!("Not logged in."),
    }
    clear_session(path)?;
    Ok(Outcome::Success)
}

pub fn whoami(gateway: &Gateway) -> anyhow::Result<Outcome> {
    let identity = gateway.identity();
    println!(
        "Agent:     {} ({}, confidence {:.2}, via {})",
        identity.name, identity.detected_type, identity.confidence, identity.detected_by
    );
    if !identity.capabilities.is_empty() {
        let caps: Vec<&str> = identity.capabilities.iter().map(String::as_str).collect();
        println!("Abilities: {}", caps.join(", "));
    }

    match session(gateway).and_then(|id| Ok(gateway.whoami(&id)?)) {
        Ok(s) => {
            let permissions: Vec<&str> = s.granted_permissions.iter().map(|p| p.as_str()).collect();
            println!("Operator:  {} ({})", s.user, s.role);
            println!("Expires:   {}", s.expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
            println!("Grants:    {}", permissions.join(", "));
        }
        Err(_) => println!("Operator:  not logged in"),
    }
    Ok(Outcome::Success)
}

pub fn execute_user(cmd: &UserCommands, gateway: &Gateway) -> anyhow::Result<Outcome> {
    let session_id = session(gateway)?;
    match cmd {
        UserCommands::Add { username, role } => {
            let role: Role = role.parse()?;
            let password = read_password(&format!("Password for {}: ", username))?;
            gateway.add_user(&session_id, &Credentials::new(username.as_str(), password), role)?;
            println!("Created user '{}' with role {}.", username, role);
        }
        UserCommands::Deactivate { username } => {
            gateway.deactivate_user(&session_id, username)?;
            println!("Deactivated '{}'.", username);
        }
        UserCommands::List => {
            let users = gateway.users(&session_id)?;
            println!("{:<24} {:<18} ACTIVE", "USERNAME", "ROLE");
            println!("{}", "-".repeat(50));
            for (name, role, active) in users {
                println!("{:<24} {:<18} {}", name, role.to_string(), if active { "yes" } else { "no" });
            }
        }
        UserCommands::Show { username, json } => {
            let summary = gateway.user_summary(&session_id, username)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(Outcome::Success);
            }
            println!("User:       {} ({})", summary.username, summary.role);
            println!("Active:     {}", if summary.active { "yes" } else { "no" });
            println!("Created:    {}", summary.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
            match summary.last_login {
                Some(at) => println!("Last login: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
                None => println!("Last login: never"),
            }
            println!();
            super::audit::print_events(&summary.recent_access);
        }
    }
    Ok(Outcome::Success)
}

pub fn execute_policy(cmd: &PolicyCommands, gateway: &Gateway) -> anyhow::Result<Outcome> {
    match cmd {
        PolicyCommands::List => {
            for policy in gateway.policies() {
                let permissions: Vec<&str> = policy.permissions.iter().map(|p| p.as_str()).collect();
                println!("{}", policy.name);
                if !policy.description.is_empty() {
                    println!("  {}", policy.description);
                }
                println!("  permissions: {}", permissions.join(", "));
                println!("  resources:   {}", policy.resource_patterns.join(", "));
                for (key, value) in &policy.conditions {
                    println!("  when {} = {}", key, value);
                }
            }
            Ok(Outcome::Success)
        }
        PolicyCommands::Eval {
            name,
            resource,
            attrs,
        } => {
            let session_id = session(gateway)?;
            let context = attrs
                .iter()
                .cloned()
                .fold(PolicyContext::new(resource.as_str()), |ctx, (k, v)| ctx.with(k, v));
            if gateway.evaluate_policy(&session_id, name, &context)? {
                println!("GRANTED by {} for {}", name, resource);
                Ok(Outcome::Success)
            } else {
                println!("DENIED by {} for {}", name, resource);
                Ok(Outcome::PolicyDenied)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_parse_json_or_fall_back_to_text() {
        assert_eq!(parse_attribute("read_only=true").unwrap(), ("read_only".to_string(), Value::Bool(true)));
        assert_eq!(
            parse_attribute("session_timeout=3600").unwrap().1,
            serde_json::json!(3600)
        );
        assert_eq!(
            parse_attribute("agent_type=claude").unwrap().1,
            Value::String("claude".to_string())
        );
        assert!(parse_attribute("no-equals").is_err());
        assert!(parse_attribute("=x").is_err());
    }
}
