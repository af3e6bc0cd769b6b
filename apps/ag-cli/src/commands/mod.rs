// mod.rs — Subcommand implementations and the helpers they share.

pub mod access;
pub mod audit;
pub mod backup;
pub mod check;
pub mod deploy;
pub mod health;
pub mod init;

use std::fs::{self, OpenOptions};
use std::io::{BufRead, IsTerminal, Write};
use std::path::Path;

use ag_gateway::{Gateway, GuardConfig};
use ag_rbac::RbacError;
use anyhow::Context;

/// Password from a no-echo prompt on a terminal, else one line of stdin.
pub fn read_password(prompt: &str) -> anyhow::Result<String> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return rpassword::prompt_password(prompt).context("Failed to read password");
    }
    read_password_line(&mut stdin.lock())
}

fn read_password_line(input: &mut impl BufRead) -> anyhow::Result<String> {
    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Session id saved by `ag login`.
pub fn current_session(config: &GuardConfig) -> anyhow::Result<String> {
    match fs::read_to_string(&config.session_file) {
        Ok(id) if !id.trim().is_empty() => Ok(id.trim().to_string()),
        Ok(_) => Err(anyhow::Error::new(RbacError::SessionNotFound).context("Run `ag login` first")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(anyhow::Error::new(RbacError::SessionNotFound).context("Run `ag login` first"))
        }
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", config.session_file.display())),
    }
}

/// Session id for a gateway call.
pub fn session(gateway: &Gateway) -> anyhow::Result<String> {
    current_session(gateway.config())
}

/// Write the session id, readable by the owner only from the moment the
/// file exists.
pub fn save_session(path: &Path, id: &str) -> anyhow::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    // A file left by an older version may carry wider permissions.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict {}", path.display()))?;
    }
    file.write_all(id.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn clear_session(path: &Path) -> anyhow::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

/// Shorten ids for table output.
pub fn short(id: &str, len: usize) -> &str {
    match id.char_indices().nth(len) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_session_file_is_a_session_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = GuardConfig::for_project(dir.path());
        let err = current_session(&config).unwrap_err();
        assert_eq!(crate::exit::error_code(&err), 4);
    }

    #[test]
    fn saved_session_is_read_back_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session");
        save_session(&path, "abc123\n").unwrap();
        let mut config = GuardConfig::for_project(dir.path());
        config.session_file = path.clone();
        assert_eq!(current_session(&config).unwrap(), "abc123");
        clear_session(&path).unwrap();
        clear_session(&path).unwrap();
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn session_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session");
        fs::write(&path, "old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        save_session(&path, "fresh").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(fs::read_to_string(&path).unwrap(), "fresh");

        let new_path = dir.path().join("new-session");
        save_session(&new_path, "id").unwrap();
        let mode = fs::metadata(&new_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn password_is_one_stdin_line() {
        let mut input = std::io::Cursor::new("s3cret pass\r\nnext-line\n");
        assert_eq!(read_password_line(&mut input).unwrap(), "s3cret pass");
        assert_eq!(read_password_line(&mut input).unwrap(), "next-line");
    }

    #[test]
    fn short_truncates_on_char_boundary() {
        assert_eq!(short("0123456789", 8), "01234567");
        assert_eq!(short("abc", 8), "abc");
    }
}
