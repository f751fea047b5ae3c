//! Detection of the vendor chat SDK script.
//!
//! The SDK is distributed by SOOP to partners and is expected to define a
//! global `ChatSDK`. When it is missing the app keeps running with chat
//! features disabled.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

/// Declarations or assignments that bring the global into existence, with or
/// without whitespace (minified vendor builds drop it). `==`/`===` comparisons
/// do not match.
static DEFINITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:class|function)\s+ChatSDK\b|(?:^|[^\w.$])(?:(?:window|globalThis|self)\.)?ChatSDK\s*=(?:[^=]|$)",
    )
    .unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatSdk {
    Available,
    Unavailable(String),
}

impl ChatSdk {
    pub fn detect(path: Option<&Path>) -> Self {
        let status = match path {
            None => ChatSdk::Unavailable("no SDK script configured".to_string()),
            Some(path) => match std::fs::read_to_string(path) {
                Ok(script) => Self::from_script(&script),
                Err(e) => ChatSdk::Unavailable(format!("cannot read {}: {}", path.display(), e)),
            },
        };

        match &status {
            ChatSdk::Available => debug!("ChatSDK loaded"),
            ChatSdk::Unavailable(reason) => warn!(
                reason = %reason,
                "ChatSDK is not loaded; replace the placeholder with the SDK file from the SOOP developer center"
            ),
        }
        status
    }

    /// Check a script body for a definition of the global. A script that only
    /// tests for it (`typeof ChatSDK`) does not count.
    pub fn from_script(script: &str) -> Self {
        let defines = script.lines().any(|line| {
            let line = line.trim();
            !line.starts_with("//") && !line.starts_with('*') && DEFINITION_RE.is_match(line)
        });

        if defines {
            ChatSdk::Available
        } else {
            ChatSdk::Unavailable("script does not define ChatSDK".to_string())
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, ChatSdk::Available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLACEHOLDER: &str = r#"/**
 * SOOP ChatSDK Placeholder
 */
if (typeof ChatSDK === 'undefined') {
  console.warn('[SOOP] ChatSDK not loaded');
}"#;

    #[test]
    fn test_placeholder_is_unavailable() {
        assert!(!ChatSdk::from_script(PLACEHOLDER).is_available());
    }

    #[test]
    fn test_definitions_are_available() {
        assert!(ChatSdk::from_script("class ChatSDK { connect() {} }").is_available());
        assert!(ChatSdk::from_script("window.ChatSDK = factory();").is_available());
        assert!(ChatSdk::from_script("  var ChatSDK = {};").is_available());
    }

    #[test]
    fn test_minified_definitions_are_available() {
        assert!(ChatSdk::from_script("window.ChatSDK=function(){return 1};").is_available());
        assert!(ChatSdk::from_script("!function(){};var ChatSDK=function(e){this.e=e};").is_available());
        assert!(ChatSdk::from_script("globalThis.ChatSDK =new Client();").is_available());
        assert!(ChatSdk::from_script("ChatSDK=1").is_available());
    }

    #[test]
    fn test_comparisons_and_other_objects_ignored() {
        assert!(!ChatSdk::from_script("if(typeof ChatSDK==='undefined'){}").is_available());
        assert!(!ChatSdk::from_script("if (window.ChatSDK == null) {}").is_available());
        assert!(!ChatSdk::from_script("vendor.ChatSDK = stub;").is_available());
        assert!(!ChatSdk::from_script("var MyChatSDK = {};").is_available());
    }

    #[test]
    fn test_commented_definition_ignored() {
        assert!(!ChatSdk::from_script("// window.ChatSDK = stub;").is_available());
    }

    #[test]
    fn test_detect_missing_path() {
        assert!(!ChatSdk::detect(None).is_available());

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("chat-sdk.js");
        assert!(!ChatSdk::detect(Some(missing.as_path())).is_available());
    }

    #[test]
    fn test_detect_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat-sdk.js");
        std::fs::write(&path, "function ChatSDK(opts) { this.opts = opts; }").unwrap();
        assert_eq!(ChatSdk::detect(Some(path.as_path())), ChatSdk::Available);
    }
}
