//! Negotiate (SPNEGO) token acquisition
//!
//! Token generation is delegated to an external helper so the agent never
//! links a Kerberos library.

use std::io::Write;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::process::Command;

use fwid_core::error::SessionError;

use super::SessionCredentials;
use crate::krbmon::KRB5CCNAME;

/// Produces the `Authorization: Negotiate` token for a service principal
#[async_trait]
pub trait Negotiator: Send + Sync {
    /// Base64 token for `service` (for example `HTTP@fw.example.com`)
    async fn token(
        &self,
        service: &str,
        credentials: &SessionCredentials,
    ) -> Result<String, SessionError>;
}

/// Runs a helper command that prints a base64 token on stdout
///
/// Each call writes the credential cache and krb5.conf snapshots to private
/// temporary files and points `KRB5CCNAME` and `KRB5_CONFIG` at them, so the
/// helper never sees a file the monitors rejected. The service principal is
/// passed as the last argument.
pub struct HelperNegotiator {
    command: Vec<String>,
}

impl HelperNegotiator {
    /// Create a negotiator; an empty `command` means no helper is configured
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

/// Write `contents` to a fresh owner-only file, removed when dropped
fn snapshot_file(prefix: &str, contents: &[u8]) -> Result<NamedTempFile, SessionError> {
    let write = || -> std::io::Result<NamedTempFile> {
        let mut file = tempfile::Builder::new().prefix(prefix).tempfile()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(contents)?;
        file.flush()?;
        Ok(file)
    };
    write().map_err(|e| {
        SessionError::AuthMaterialMissing(format!("could not write snapshot file {}*: {}", prefix, e))
    })
}

#[async_trait]
impl Negotiator for HelperNegotiator {
    async fn token(
        &self,
        service: &str,
        credentials: &SessionCredentials,
    ) -> Result<String, SessionError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(SessionError::AuthMaterialMissing(
                "no negotiate helper configured".to_string(),
            ));
        };

        // Both files must outlive the helper process
        let ccache = snapshot_file("fwid_krb5cc_", &credentials.ccache.to_bytes())?;
        let krb5_conf = snapshot_file("fwid_krb5conf_", credentials.krb5_conf.source().as_bytes())?;

        let output = Command::new(program)
            .args(args)
            .arg(service)
            .env(KRB5CCNAME, format!("FILE:{}", ccache.path().display()))
            .env("KRB5_CONFIG", krb5_conf.path())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SessionError::Token(format!("could not run {}: {}", program, e)))?;

        drop(ccache);
        drop(krb5_conf);

        if !output.status.success() {
            return Err(SessionError::Token(format!(
                "{} failed with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let token = String::from_utf8(output.stdout)
            .map_err(|_| SessionError::Token(format!("{} printed a non UTF-8 token", program)))?;
        let token = token.trim();
        if token.is_empty() {
            return Err(SessionError::Token(format!("{} printed no token", program)));
        }
        Ok(token.to_string())
    }
}
