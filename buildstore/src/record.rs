use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::score::{TestScore, parse_score_line, total_score};

/// `group` of an individual build.
pub const NO_GROUP: i64 = -1;
/// `user` of a group build.
pub const NO_USER: &str = "";
pub const DEFAULT_STATUS: &str = "Active lab assignment";
pub const APPROVED_STATUS: &str = "Approved";
/// Replacement for secrets and tokens in persisted output.
pub const SANITIZED: &str = "Sanitized";

const PASS_MARKER: &str = "--- PASS";
const FAIL_MARKER: &str = "--- FAIL";
const BUILD_FAILURE_MARKER: &str = "build failed";

/// Who a build belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Submitter {
    User(String),
    Group(i64),
}

impl Submitter {
    /// Stable key component, e.g. `user:alice` or `group:7`.
    pub fn key_part(&self) -> String {
        match self {
            Self::User(name) => format!("user:{name}"),
            Self::Group(id) => format!("group:{id}"),
        }
    }
}

impl fmt::Display for Submitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(name) => write!(f, "user {name}"),
            Self::Group(id) => write!(f, "group {id}"),
        }
    }
}

/// Durable record of one test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub id: u64,
    pub course: String,
    /// [`NO_USER`] for group builds.
    pub user: String,
    /// [`NO_GROUP`] for individual builds.
    pub group: i64,
    pub lab_number: u32,
    pub log: Vec<String>,
    pub num_passes: u32,
    pub num_fails: u32,
    pub num_build_failures: u32,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub push_time: DateTime<Utc>,
    pub test_scores: Vec<TestScore>,
    pub total_score: u32,
    pub head_commit_id: Option<String>,
    pub head_commit_text: Option<String>,
    pub build_time_ms: u64,
}

impl BuildResult {
    /// Empty record for `submitter`, timestamped now.
    pub fn new(id: u64, course: &str, submitter: &Submitter, lab_number: u32) -> Self {
        let (user, group) = match submitter {
            Submitter::User(name) => (name.clone(), NO_GROUP),
            Submitter::Group(id) => (NO_USER.to_string(), *id),
        };
        let now = Utc::now();
        Self {
            id,
            course: course.to_string(),
            user,
            group,
            lab_number,
            log: Vec::new(),
            num_passes: 0,
            num_fails: 0,
            num_build_failures: 0,
            status: DEFAULT_STATUS.to_string(),
            timestamp: now,
            push_time: now,
            test_scores: Vec::new(),
            total_score: 0,
            head_commit_id: None,
            head_commit_text: None,
            build_time_ms: 0,
        }
    }

    pub fn submitter(&self) -> Submitter {
        if self.group == NO_GROUP {
            Submitter::User(self.user.clone())
        } else {
            Submitter::Group(self.group)
        }
    }

    /// Append one output line.
    ///
    /// The line is NUL- and whitespace-trimmed, then passed through
    /// `redactor`: score records are collected instead of logged, secrets
    /// and tokens are masked. Empty lines are dropped.
    pub fn add(&mut self, line: &str, redactor: &LogRedactor) {
        let line = line.trim_matches('\0').trim();
        if line.is_empty() {
            return;
        }
        match redactor.redact(line) {
            Redacted::Score(score) => self.test_scores.push(score),
            Redacted::Line(line) => self.log.push(line),
        }
    }

    /// Append raw process output, one entry per line.
    ///
    /// Invalid UTF-8 sequences are dropped rather than replaced.
    pub fn add_output(&mut self, output: &[u8], redactor: &LogRedactor) {
        for raw in output.split(|b| *b == b'\n') {
            let line: String = raw.utf8_chunks().map(|chunk| chunk.valid()).collect();
            self.add(&line, redactor);
        }
    }

    /// Freeze the derived fields: pass/fail/build-failure counts, total
    /// score and build time.
    pub fn done(&mut self) {
        let count = |marker: &str| -> u32 {
            let n: usize = self.log.iter().map(|line| line.matches(marker).count()).sum();
            u32::try_from(n).unwrap_or(u32::MAX)
        };
        self.num_passes = count(PASS_MARKER);
        self.num_fails = count(FAIL_MARKER);
        self.num_build_failures = count(BUILD_FAILURE_MARKER);

        let tests = u64::from(self.num_passes) + u64::from(self.num_fails);
        self.total_score = if !self.test_scores.is_empty() {
            total_score(&self.test_scores)
        } else {
            (u64::from(self.num_passes) * 100)
                .checked_div(tests)
                .and_then(|percent| u32::try_from(percent).ok())
                .unwrap_or(0)
        };
        if self.num_build_failures > 0 {
            self.total_score = 0;
        }

        let elapsed = Utc::now().signed_duration_since(self.timestamp);
        self.build_time_ms = u64::try_from(elapsed.num_milliseconds()).unwrap_or(0);
    }
}

/// Outcome of passing a line through a [`LogRedactor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redacted {
    /// A score record for this course, secret already masked.
    Score(TestScore),
    Line(String),
}

/// Masks the course secret and the admin token in output lines.
///
/// Empty secrets or tokens are ignored.
#[derive(Clone, Default)]
pub struct LogRedactor {
    secret: String,
    token: String,
}

impl fmt::Debug for LogRedactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogRedactor").finish_non_exhaustive()
    }
}

impl LogRedactor {
    pub fn new(secret: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            token: token.into(),
        }
    }

    /// Mask every occurrence of the token and secret in `text`.
    pub fn mask(&self, text: &str) -> String {
        let mut masked = text.to_string();
        for needle in [&self.secret, &self.token] {
            if !needle.is_empty() && masked.contains(needle.as_str()) {
                masked = masked.replace(needle.as_str(), SANITIZED);
            }
        }
        masked
    }

    pub fn redact(&self, line: &str) -> Redacted {
        if !self.secret.is_empty()
            && line.contains(self.secret.as_str())
            && let Some(mut score) = parse_score_line(line)
            && score.secret == self.secret
        {
            score.secret = SANITIZED.to_string();
            return Redacted::Score(score);
        }
        Redacted::Line(self.mask(line))
    }
}
