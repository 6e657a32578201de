//! Advisory Windows Authenticode signature probe.
//!
//! Read-only and external: shells out to PowerShell's
//! `Get-AuthenticodeSignature`. Never affects archive state; any failure to
//! invoke PowerShell, a non-zero exit, or unparsable output degrades to an
//! all-`"Unknown"` status rather than propagating an error. Chain/trust
//! validation is out of scope; this only surfaces what the OS reports.

use std::path::Path;
use std::process::Command;

use serde::Deserialize;
use tracing::warn;

/// Signature status for one file, as reported by `Get-AuthenticodeSignature`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct SignatureStatus {
    #[serde(rename = "Status", default = "unknown_status_value")]
    pub status: String,
    #[serde(rename = "StatusMessage", default)]
    pub status_message: String,
    #[serde(rename = "Signer", default)]
    pub signer: String,
    #[serde(rename = "Timestamp", default)]
    pub timestamp: String,
}

fn unknown_status_value() -> String {
    "Unknown".to_string()
}

impl SignatureStatus {
    fn unknown(message: impl Into<String>) -> SignatureStatus {
        SignatureStatus {
            status: "Unknown".to_string(),
            status_message: message.into(),
            signer: String::new(),
            timestamp: String::new(),
        }
    }
}

/// Probes `path`'s Authenticode signature. Always returns a status; never
/// fails the caller's load or save.
pub fn probe(path: &Path) -> SignatureStatus {
    let script = format!(
        "$s=Get-AuthenticodeSignature -FilePath '{}';\
         [pscustomobject]@{{\
         Status=$s.Status.ToString();\
         StatusMessage=$s.StatusMessage;\
         Signer=if($s.SignerCertificate){{$s.SignerCertificate.Subject}}else{{''}};\
         Timestamp=if($s.TimeStamperCertificate){{$s.TimeStamperCertificate.Subject}}else{{''}}\
         }}|ConvertTo-Json -Compress",
        path.display().to_string().replace('\'', "''")
    );

    let output = match Command::new("powershell")
        .args(["-NoProfile", "-Command", &script])
        .output()
    {
        Ok(output) => output,
        Err(error) => {
            warn!(%error, "failed to invoke powershell for signature probe");
            return SignatureStatus::unknown("signature check failed");
        }
    };

    if !output.status.success() {
        let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return SignatureStatus::unknown(if message.is_empty() {
            "signature check failed".to_string()
        } else {
            message
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    match serde_json::from_str::<SignatureStatus>(stdout.trim()) {
        Ok(status) => status,
        Err(_) => SignatureStatus::unknown(if stdout.trim().is_empty() {
            "no signature output".to_string()
        } else {
            stdout.trim().to_string()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_signature_json() {
        let json = r#"{"Status":"Valid","StatusMessage":"","Signer":"CN=Example","Timestamp":""}"#;
        let status: SignatureStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.status, "Valid");
        assert_eq!(status.signer, "CN=Example");
    }

    #[test]
    fn unknown_status_carries_a_message() {
        let status = SignatureStatus::unknown("signature check failed");
        assert_eq!(status.status, "Unknown");
        assert_eq!(status.status_message, "signature check failed");
    }
}
