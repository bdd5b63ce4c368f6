//! Target domain payload types.
//!
//! Attach/detach notifications that drive session lifecycle on the
//! connection.

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;

use crate::identifiers::{SessionId, TargetId};

// ============================================================================
// TargetInfo
// ============================================================================

/// Description of an attachable target.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    /// Target id.
    pub target_id: TargetId,

    /// Target type, e.g. `page`, `iframe`, `service_worker`.
    #[serde(rename = "type")]
    pub target_type: String,

    /// Target title.
    #[serde(default)]
    pub title: String,

    /// Target URL.
    #[serde(default)]
    pub url: String,

    /// Whether a client is attached.
    #[serde(default)]
    pub attached: bool,
}

// ============================================================================
// AttachedToTargetParams
// ============================================================================

/// `Target.attachedToTarget` event parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedToTargetParams {
    /// The newly assigned session id.
    pub session_id: SessionId,

    /// The target the session is attached to.
    pub target_info: TargetInfo,

    /// Whether the target is paused waiting for the debugger.
    #[serde(default)]
    pub waiting_for_debugger: bool,
}

// ============================================================================
// DetachedFromTargetParams
// ============================================================================

/// `Target.detachedFromTarget` event parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachedFromTargetParams {
    /// The session that was detached.
    pub session_id: SessionId,

    /// The target it was attached to, when reported.
    #[serde(default)]
    pub target_id: Option<TargetId>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attached_to_target_parsing() {
        let json_str = r#"{
            "sessionId": "SESSION-1",
            "targetInfo": {
                "targetId": "TARGET-1",
                "type": "page",
                "title": "Example",
                "url": "https://example.com",
                "attached": true
            },
            "waitingForDebugger": false
        }"#;

        let params: AttachedToTargetParams = serde_json::from_str(json_str).expect("parse");
        assert_eq!(params.session_id.as_str(), "SESSION-1");
        assert_eq!(params.target_info.target_type, "page");
        assert!(!params.waiting_for_debugger);
    }

    #[test]
    fn test_detached_from_target_parsing() {
        let json_str = r#"{"sessionId": "SESSION-1"}"#;

        let params: DetachedFromTargetParams = serde_json::from_str(json_str).expect("parse");
        assert_eq!(params.session_id.as_str(), "SESSION-1");
        assert!(params.target_id.is_none());
    }
}
