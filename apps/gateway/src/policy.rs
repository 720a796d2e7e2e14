use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use gateway_action::{AuthorizerError, Caller, RunAuthorizer};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// On-disk policy. Tokens are stored as SHA-256 hex digests.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub principals: Vec<PrincipalGrant>,
    #[serde(default)]
    pub public_groups: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrincipalGrant {
    pub subject: String,
    pub token_sha256: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub view_groups: Vec<String>,
    #[serde(default)]
    pub action_groups: Vec<String>,
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse policy file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("principal '{subject}' has an empty token digest")]
    EmptyToken { subject: String },
    #[error("principal '{subject}' is declared more than once")]
    DuplicateSubject { subject: String },
    #[error("principal '{subject}' reuses another principal's token")]
    DuplicateToken { subject: String },
}

/// Group-scoped permissions loaded once at startup.
///
/// Admins may view and act on every group. Anyone, including anonymous
/// callers, may view a public group. A grant ending in `/*` covers every
/// group below that prefix, and an action grant implies view.
#[derive(Debug, Clone, Default)]
pub struct GroupPolicy {
    subjects_by_token: HashMap<String, String>,
    principals: HashMap<String, PrincipalGrant>,
    public_groups: Vec<String>,
}

impl GroupPolicy {
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let raw = std::fs::read(path).map_err(|source| PolicyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let document =
            serde_json::from_slice::<PolicyDocument>(&raw).map_err(|source| PolicyError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_document(document)
    }

    pub fn from_document(document: PolicyDocument) -> Result<Self, PolicyError> {
        let mut subjects_by_token = HashMap::new();
        let mut principals = HashMap::new();

        for grant in document.principals {
            let digest = grant.token_sha256.trim().to_lowercase();
            if digest.is_empty() {
                return Err(PolicyError::EmptyToken {
                    subject: grant.subject,
                });
            }
            if principals.contains_key(&grant.subject) {
                return Err(PolicyError::DuplicateSubject {
                    subject: grant.subject,
                });
            }
            if subjects_by_token.contains_key(&digest) {
                return Err(PolicyError::DuplicateToken {
                    subject: grant.subject,
                });
            }
            subjects_by_token.insert(digest, grant.subject.clone());
            principals.insert(grant.subject.clone(), grant);
        }

        Ok(Self {
            subjects_by_token,
            principals,
            public_groups: document.public_groups,
        })
    }

    /// `None` means a token was presented but matches no principal. A
    /// request without a token resolves to the anonymous caller.
    #[must_use]
    pub fn authenticate(&self, token: Option<&str>) -> Option<Caller> {
        let Some(token) = token else {
            return Some(Caller::anonymous());
        };
        let digest = token_digest(token);
        self.subjects_by_token
            .get(&digest)
            .map(|subject| Caller::subject(subject.clone()))
    }

    #[must_use]
    pub fn can_view(&self, caller: &Caller, group: &str) -> bool {
        if self
            .public_groups
            .iter()
            .any(|pattern| group_matches(pattern, group))
        {
            return true;
        }
        let Some(grant) = self.grant(caller) else {
            return false;
        };
        grant.admin
            || grant
                .view_groups
                .iter()
                .chain(grant.action_groups.iter())
                .any(|pattern| group_matches(pattern, group))
    }

    #[must_use]
    pub fn can_act(&self, caller: &Caller, group: &str) -> bool {
        let Some(grant) = self.grant(caller) else {
            return false;
        };
        grant.admin
            || grant
                .action_groups
                .iter()
                .any(|pattern| group_matches(pattern, group))
    }

    fn grant(&self, caller: &Caller) -> Option<&PrincipalGrant> {
        caller
            .subject
            .as_deref()
            .and_then(|subject| self.principals.get(subject))
    }
}

#[async_trait]
impl RunAuthorizer for GroupPolicy {
    async fn can_get_run(&self, caller: &Caller, group: &str) -> Result<bool, AuthorizerError> {
        Ok(self.can_view(caller, group))
    }

    async fn can_do_run_actions(
        &self,
        caller: &Caller,
        group: &str,
    ) -> Result<bool, AuthorizerError> {
        Ok(self.can_act(caller, group))
    }
}

#[must_use]
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.trim().as_bytes()))
}

fn group_matches(pattern: &str, group: &str) -> bool {
    match pattern.strip_suffix("/*") {
        Some(prefix) => group
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/') && rest.len() > 1),
        None => pattern == group,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn grant(subject: &str, token: &str) -> PrincipalGrant {
        PrincipalGrant {
            subject: subject.to_string(),
            token_sha256: token_digest(token),
            admin: false,
            view_groups: Vec::new(),
            action_groups: Vec::new(),
        }
    }

    fn sample_policy() -> GroupPolicy {
        let mut alice = grant("alice", "alice-token");
        alice.view_groups = vec!["/org/acme/*".to_string()];
        alice.action_groups = vec!["/project/p1".to_string()];
        let mut root = grant("root", "root-token");
        root.admin = true;

        GroupPolicy::from_document(PolicyDocument {
            principals: vec![alice, root],
            public_groups: vec!["/project/public".to_string()],
        })
        .expect("policy")
    }

    #[test]
    fn tokens_resolve_to_subjects() {
        let policy = sample_policy();
        assert_eq!(
            policy.authenticate(Some("alice-token")),
            Some(Caller::subject("alice"))
        );
        assert_eq!(policy.authenticate(None), Some(Caller::anonymous()));
        assert_eq!(policy.authenticate(Some("forged")), None);
    }

    #[test]
    fn view_and_action_grants_are_evaluated_per_group() {
        let policy = sample_policy();
        let alice = Caller::subject("alice");

        assert!(policy.can_view(&alice, "/org/acme/project/p9"));
        assert!(!policy.can_view(&alice, "/org/acme"));
        assert!(!policy.can_view(&alice, "/org/acmex/project/p9"));
        assert!(policy.can_view(&alice, "/project/p1"));
        assert!(policy.can_act(&alice, "/project/p1"));
        assert!(!policy.can_act(&alice, "/org/acme/project/p9"));
    }

    #[test]
    fn public_groups_are_viewable_by_anyone_but_not_actionable() {
        let policy = sample_policy();
        let anonymous = Caller::anonymous();

        assert!(policy.can_view(&anonymous, "/project/public"));
        assert!(!policy.can_act(&anonymous, "/project/public"));
        assert!(!policy.can_view(&anonymous, "/project/p1"));
    }

    #[test]
    fn admins_may_do_everything() {
        let policy = sample_policy();
        let root = Caller::subject("root");
        assert!(policy.can_view(&root, "/anything"));
        assert!(policy.can_act(&root, "/anything"));
    }

    #[test]
    fn unknown_subjects_and_the_empty_policy_deny() {
        let policy = GroupPolicy::default();
        assert!(!policy.can_view(&Caller::subject("alice"), "/project/p1"));
        assert!(!policy.can_act(&Caller::subject("alice"), "/project/p1"));
    }

    #[test]
    fn duplicate_principals_are_rejected() {
        let result = GroupPolicy::from_document(PolicyDocument {
            principals: vec![grant("alice", "t1"), grant("alice", "t2")],
            public_groups: Vec::new(),
        });
        assert!(matches!(result, Err(PolicyError::DuplicateSubject { .. })));

        let result = GroupPolicy::from_document(PolicyDocument {
            principals: vec![grant("alice", "t1"), grant("bob", "t1")],
            public_groups: Vec::new(),
        });
        assert!(matches!(result, Err(PolicyError::DuplicateToken { .. })));
    }

    #[test]
    fn policy_loads_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        let document = serde_json::json!({
            "principals": [{
                "subject": "alice",
                "token_sha256": token_digest("alice-token").to_uppercase(),
                "action_groups": ["/project/p1"]
            }]
        });
        file.write_all(document.to_string().as_bytes())
            .expect("write policy");

        let policy = GroupPolicy::load(file.path()).expect("load policy");
        let alice = policy.authenticate(Some(" alice-token ")).expect("alice");
        assert!(policy.can_act(&alice, "/project/p1"));
    }

    #[test]
    fn unreadable_policy_reports_path() {
        let result = GroupPolicy::load(Path::new("/nonexistent/policy.json"));
        assert!(matches!(result, Err(PolicyError::Read { .. })));
    }
}
