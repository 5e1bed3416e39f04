use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use sandbox::SandboxError;

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "unix:///var/run/docker.sock";

const SCHEMES: [&str; 4] = ["unix://", "tcp://", "ssh://", "npipe://"];

/// Check that `endpoint` is an address the docker client understands.
pub fn validate_endpoint(endpoint: &str) -> Result<(), SandboxError> {
    let rest = SCHEMES
        .iter()
        .find_map(|scheme| endpoint.strip_prefix(scheme))
        .ok_or_else(|| {
            SandboxError::Connection(format!(
                "unsupported endpoint '{endpoint}' (expected one of {})",
                SCHEMES.join(", ")
            ))
        })?;
    if rest.is_empty() {
        return Err(SandboxError::Connection(format!(
            "endpoint '{endpoint}' has no address"
        )));
    }
    Ok(())
}

/// Verify the host can talk to a docker daemon at `endpoint`.
///
/// Checks the endpoint syntax and locates an executable client (`binary`
/// when given, otherwise `docker` on `PATH`). Collects all failures into a
/// single `Connection` error; returns the client path on success.
pub fn check_prerequisites(binary: Option<&Path>, endpoint: &str) -> Result<PathBuf, SandboxError> {
    let mut errors = Vec::new();

    if let Err(e) = validate_endpoint(endpoint) {
        errors.push(e.to_string());
    }
    let binary = match binary {
        Some(path) => {
            check_executable(path, &mut errors);
            Some(path.to_path_buf())
        }
        None => match which::which("docker") {
            Ok(path) => Some(path),
            Err(e) => {
                errors.push(format!("docker binary not found on PATH: {e}"));
                None
            }
        },
    };

    match binary {
        Some(path) if errors.is_empty() => Ok(path),
        _ => Err(SandboxError::Connection(errors.join("; "))),
    }
}

fn check_executable(path: &Path, errors: &mut Vec<String>) {
    match path.metadata() {
        Ok(meta) if meta.permissions().mode() & 0o111 == 0 => {
            errors.push(format!("docker binary is not executable: {}", path.display()));
        }
        Ok(_) => {}
        Err(_) => errors.push(format!("docker binary not found: {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_schemes() {
        for endpoint in [DEFAULT_ENDPOINT, "tcp://10.0.0.2:2375", "ssh://ci@build-host"] {
            validate_endpoint(endpoint).unwrap();
        }
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = validate_endpoint("http://localhost:2375").unwrap_err();
        assert!(matches!(err, SandboxError::Connection(_)));
        assert!(err.to_string().contains("http://localhost:2375"));
    }

    #[test]
    fn rejects_empty_address() {
        assert!(validate_endpoint("tcp://").is_err());
    }

    #[test]
    fn collects_all_failures() {
        let err = check_prerequisites(Some(Path::new("/nonexistent/docker")), "ftp://x").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unsupported endpoint"), "got: {msg}");
        assert!(msg.contains("/nonexistent/docker"), "got: {msg}");
    }

    #[test]
    fn accepts_executable_binary() {
        let Ok(sh) = which::which("sh") else {
            return;
        };
        assert_eq!(check_prerequisites(Some(&sh), DEFAULT_ENDPOINT).unwrap(), sh);
    }
}
