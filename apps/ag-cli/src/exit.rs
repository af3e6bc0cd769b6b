// exit.rs — Process exit codes.
//
//   0  success
//   1  any other error
//   2  rule validation failed
//   3  health check failed (deployment rolled back)
//   4  permission denied, or no valid session
//   5  deployment, backup, user or policy not found
//   6  another deployment is in progress
//   7  operation denied by policy (`ag check`, `ag policy eval`)

use std::process::ExitCode;

use ag_deploy::DeployError;
use ag_gateway::GatewayError;
use ag_rbac::RbacError;

/// How a command that ran to completion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Finished, but the work it was asked to do did not happen.
    Failed,
    ValidationFailed,
    HealthCheckFailed,
    PolicyDenied,
}

impl Outcome {
    pub fn code(self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::Failed => 1,
            Outcome::ValidationFailed => 2,
            Outcome::HealthCheckFailed => 3,
            Outcome::PolicyDenied => 7,
        }
    }
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        ExitCode::from(outcome.code())
    }
}

/// Exit code for a command that failed with an error.
pub fn error_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<GatewayError>() {
            return gateway_code(e);
        }
        if let Some(e) = cause.downcast_ref::<RbacError>() {
            return rbac_code(e);
        }
        if let Some(e) = cause.downcast_ref::<DeployError>() {
            return deploy_code(e);
        }
        if cause.downcast_ref::<ag_policy::ValidationError>().is_some()
            || cause.downcast_ref::<ag_policy::RuleLoadError>().is_some()
        {
            return 2;
        }
    }
    1
}

fn gateway_code(err: &GatewayError) -> u8 {
    match err {
        GatewayError::Validation(_) | GatewayError::RuleLoad(_) => 2,
        GatewayError::Rbac(e) => rbac_code(e),
        GatewayError::Deploy(e) => deploy_code(e),
        _ => 1,
    }
}

fn rbac_code(err: &RbacError) -> u8 {
    match err {
        RbacError::PermissionDenied { .. }
        | RbacError::SessionExpired
        | RbacError::SessionNotFound
        | RbacError::InvalidCredentials
        | RbacError::UserInactive(_) => 4,
        RbacError::UserNotFound(_) | RbacError::Unknown { kind: "policy", .. } => 5,
        RbacError::InvalidPolicy { .. } => 2,
        _ => 1,
    }
}

fn deploy_code(err: &DeployError) -> u8 {
    match err {
        DeployError::RuleLoad(_) => 2,
        DeployError::DeploymentNotFound(_) | DeployError::BackupNotFound(_) => 5,
        DeployError::DeploymentInProgress => 6,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_rbac::Permission;

    #[test]
    fn rbac_failures_map_to_four() {
        let err = anyhow::Error::new(GatewayError::Rbac(RbacError::PermissionDenied {
            user: "viewer".into(),
            permission: Permission::DeploySystem,
        }));
        assert_eq!(error_code(&err), 4);
        let err = anyhow::Error::new(RbacError::SessionExpired).context("loading session");
        assert_eq!(error_code(&err), 4);
    }

    #[test]
    fn deployment_errors_map_by_kind() {
        let busy = anyhow::Error::new(GatewayError::Deploy(DeployError::DeploymentInProgress));
        assert_eq!(error_code(&busy), 6);
        let missing =
            anyhow::Error::new(GatewayError::Deploy(DeployError::BackupNotFound("x".into())));
        assert_eq!(error_code(&missing), 5);
    }

    #[test]
    fn unrelated_errors_are_one() {
        assert_eq!(error_code(&anyhow::anyhow!("disk on fire")), 1);
    }
}
