//! Permission request types
//!
//! Agents ask before acting through `session/request_permission`. The request
//! lists options. The client answers with one of those option ids or with
//! `cancelled`.

use serde::{Deserialize, Serialize};

use super::identifiers::SessionId;
use super::updates::ToolCallFields;

// ============================================================================
// Options
// ============================================================================

/// Kind of a permission option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOptionKind {
    /// Allow this one action
    AllowOnce,
    /// Allow this action from now on
    AllowAlways,
    /// Reject this one action
    RejectOnce,
    /// Reject this action from now on
    RejectAlways,
}

/// One selectable option offered by the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    /// Id echoed back when selected
    pub option_id: String,
    /// Label
    pub name: String,
    /// What selecting it means
    pub kind: PermissionOptionKind,
}

impl PermissionOption {
    /// Create an option
    pub fn new(
        option_id: impl Into<String>,
        name: impl Into<String>,
        kind: PermissionOptionKind,
    ) -> Self {
        Self {
            option_id: option_id.into(),
            name: name.into(),
            kind,
        }
    }
}

// ============================================================================
// Request / Outcome
// ============================================================================

/// `session/request_permission` params
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPermissionParams {
    /// Session asking
    pub session_id: SessionId,
    /// Tool call the permission is for
    pub tool_call: ToolCallFields,
    /// Options to choose from
    #[serde(default)]
    pub options: Vec<PermissionOption>,
}

/// Outcome sent back to the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PermissionOutcome {
    /// One of the offered options was chosen
    Selected {
        /// The chosen option id
        #[serde(rename = "optionId")]
        option_id: String,
    },
    /// No decision (turn cancelled, session torn down, no matching option)
    Cancelled,
}

/// `session/request_permission` result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPermissionResponse {
    /// The outcome
    pub outcome: PermissionOutcome,
}

/// Preference order used when granting
const GRANT_PREFERENCE: [PermissionOptionKind; 2] = [
    PermissionOptionKind::AllowOnce,
    PermissionOptionKind::AllowAlways,
];

/// Preference order used when denying
const DENY_PREFERENCE: [PermissionOptionKind; 2] = [
    PermissionOptionKind::RejectOnce,
    PermissionOptionKind::RejectAlways,
];

/// Pick the option that best expresses a yes/no decision
///
/// Granting prefers `allow_once` over `allow_always`. Denying prefers
/// `reject_once` over `reject_always`. Without a matching option the outcome
/// is [`PermissionOutcome::Cancelled`].
#[must_use]
pub fn select_option(options: &[PermissionOption], granted: bool) -> PermissionOutcome {
    let preference = if granted {
        &GRANT_PREFERENCE
    } else {
        &DENY_PREFERENCE
    };

    preference
        .iter()
        .find_map(|kind| options.iter().find(|option| option.kind == *kind))
        .map_or(PermissionOutcome::Cancelled, |option| {
            PermissionOutcome::Selected {
                option_id: option.option_id.clone(),
            }
        })
}
