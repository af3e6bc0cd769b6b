// init.rs — `ag init`: create `.ag/` and optionally the first administrator.

use ag_gateway::{Gateway, GuardConfig};
use ag_rbac::Credentials;

use super::read_password;
use crate::exit::Outcome;

pub fn execute(config: GuardConfig, admin: Option<&str>) -> anyhow::Result<Outcome> {
    let report = Gateway::init(&config)?;
    if report.created.is_empty() {
        println!(
            "Agent Guard already initialized in {}",
            config.state_dir.display()
        );
    } else {
        println!("Initialized Agent Guard in {}", config.state_dir.display());
        for path in &report.created {
            println!("  created {}", path);
        }
    }

    if let Some(username) = admin {
        let password = read_password("Administrator password: ")?;
        let gateway = Gateway::open(config)?;
        if gateway.bootstrap_admin(&Credentials::new(username, password))? {
            println!("Created administrator '{}'. Log in with `ag login {}`.", username, username);
        } else {
            println!("Users already exist; no administrator created.");
        }
    }
    Ok(Outcome::Success)
}
