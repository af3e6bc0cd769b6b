// permission.rs — Permissions and the fixed role → permission mapping.
//
//   Viewer ⊂ Operator ⊂ Administrator ⊂ SystemAdmin
//   AiAgent and SecurityAuditor have their own fixed sets.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RbacError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ReadRules,
    WriteRules,
    DeleteRules,
    ExecuteRules,
    ModifyConfig,
    ViewLogs,
    ManageBackups,
    DeploySystem,
    MonitorSystem,
    ManageUsers,
    SystemAdmin,
}

impl Permission {
    pub const ALL: [Permission; 11] = [
        Permission::ReadRules,
        Permission::WriteRules,
        Permission::DeleteRules,
        Permission::ExecuteRules,
        Permission::ModifyConfig,
        Permission::ViewLogs,
        Permission::ManageBackups,
        Permission::DeploySystem,
        Permission::MonitorSystem,
        Permission::ManageUsers,
        Permission::SystemAdmin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::ReadRules => "read_rules",
            Permission::WriteRules => "write_rules",
            Permission::DeleteRules => "delete_rules",
            Permission::ExecuteRules => "execute_rules",
            Permission::ModifyConfig => "modify_config",
            Permission::ViewLogs => "view_logs",
            Permission::ManageBackups => "manage_backups",
            Permission::DeploySystem => "deploy_system",
            Permission::MonitorSystem => "monitor_system",
            Permission::ManageUsers => "manage_users",
            Permission::SystemAdmin => "system_admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| RbacError::Unknown {
                kind: "permission",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Operator,
    Administrator,
    SystemAdmin,
    AiAgent,
    SecurityAuditor,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Operator => "operator",
            Role::Administrator => "administrator",
            Role::SystemAdmin => "system_admin",
            Role::AiAgent => "ai_agent",
            Role::SecurityAuditor => "security_auditor",
        }
    }

    pub fn permissions(self) -> BTreeSet<Permission> {
        use Permission::*;
        let granted: &[Permission] = match self {
            Role::Viewer => &[ReadRules, ViewLogs],
            Role::Operator => &[ReadRules, ExecuteRules, ViewLogs, MonitorSystem],
            Role::Administrator => &[
                ReadRules,
                WriteRules,
                ExecuteRules,
                ModifyConfig,
                ViewLogs,
                ManageBackups,
                DeploySystem,
                MonitorSystem,
            ],
            Role::SystemAdmin => &Permission::ALL,
            Role::AiAgent => &[ReadRules, ExecuteRules],
            Role::SecurityAuditor => &[ReadRules, ViewLogs, MonitorSystem],
        };
        granted.iter().copied().collect()
    }

    pub fn grants(self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let role = match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "viewer" => Role::Viewer,
            "operator" => Role::Operator,
            "administrator" | "admin" => Role::Administrator,
            "system_admin" => Role::SystemAdmin,
            "ai_agent" | "agent" => Role::AiAgent,
            "security_auditor" | "auditor" => Role::SecurityAuditor,
            _ => {
                return Err(RbacError::Unknown {
                    kind: "role",
                    value: s.to_string(),
                })
            }
        };
        Ok(role)
    }
}
