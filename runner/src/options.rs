use std::fmt;

use buildstore::{LinkageKey, LogRedactor, Submitter};
use serde::{Deserialize, Serialize};

use crate::error::{RunnerError, RunnerResult};

/// Parameters of one build request.
///
/// Folder fields are concatenated as given: `base_folder` carries its own
/// trailing slash, `dest_folder` and `lab_folder` carry none.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Course organization the repositories live in.
    pub org: String,
    /// Submitting user; empty for group builds.
    #[serde(default)]
    pub user: String,
    /// Submitting group; set for group builds.
    #[serde(default)]
    pub group: Option<i64>,
    pub user_repo: String,
    pub test_repo: String,
    pub base_folder: String,
    pub lab_folder: String,
    pub lab_number: u32,
    pub dest_folder: String,
    /// Triggered by a repository push rather than a manual request.
    #[serde(default)]
    pub is_push: bool,
    /// Credential embedded in clone URLs.
    #[serde(default)]
    pub admin_token: String,
    /// Course secret that authenticates score records.
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub head_commit_id: Option<String>,
    #[serde(default)]
    pub head_commit_text: Option<String>,
}

impl fmt::Debug for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hidden = |value: &str| if value.is_empty() { "" } else { "<redacted>" };
        f.debug_struct("BuildOptions")
            .field("org", &self.org)
            .field("user", &self.user)
            .field("group", &self.group)
            .field("user_repo", &self.user_repo)
            .field("test_repo", &self.test_repo)
            .field("base_folder", &self.base_folder)
            .field("lab_folder", &self.lab_folder)
            .field("lab_number", &self.lab_number)
            .field("dest_folder", &self.dest_folder)
            .field("is_push", &self.is_push)
            .field("admin_token", &hidden(&self.admin_token))
            .field("secret", &hidden(&self.secret))
            .field("head_commit_id", &self.head_commit_id)
            .finish_non_exhaustive()
    }
}

impl BuildOptions {
    /// Check the fields needed to derive commands and storage keys.
    pub fn validate(&self) -> RunnerResult<()> {
        let required = [
            ("org", &self.org),
            ("user_repo", &self.user_repo),
            ("test_repo", &self.test_repo),
            ("base_folder", &self.base_folder),
            ("lab_folder", &self.lab_folder),
            ("dest_folder", &self.dest_folder),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(RunnerError::Options(format!("{name} must not be empty")));
        }
        match (self.user.is_empty(), self.group) {
            (true, None) => Err(RunnerError::Options("either user or group must be set".into())),
            (false, Some(_)) => Err(RunnerError::Options(
                "user and group are mutually exclusive".into(),
            )),
            _ => Ok(()),
        }
    }

    pub fn submitter(&self) -> Submitter {
        match self.group {
            Some(group) => Submitter::Group(group),
            None => Submitter::User(self.user.clone()),
        }
    }

    /// Key of the history this build is appended to.
    pub fn linkage_key(&self) -> LinkageKey {
        LinkageKey::new(self.org.clone(), self.submitter(), self.lab_number)
    }

    pub fn redactor(&self) -> LogRedactor {
        LogRedactor::new(self.secret.clone(), self.admin_token.clone())
    }
}
