//! Message-channel commands between the hub and UI surfaces.
//!
//! Both directions share one wire shape, `{"type": "cmd", "cmd": <name>, ...fields}`.
//! In-process the commands travel as typed enums; [`HubToSurface::to_wire`] and
//! [`SurfaceToHub::from_wire`] are used at the boundary to page scripts.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// The only message `type` in use.
const CMD_TYPE: &str = "cmd";

/// Snapshot of the browser tab a surface was opened for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TabInfo {
    /// Tab URL.
    pub url: String,
    /// Tab title.
    pub title: String,
}

impl TabInfo {
    /// Create a tab snapshot.
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }
}

/// Command pushed from the hub to a surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum HubToSurface {
    /// Bring the surface window forward.
    Focus,
    /// Close the surface window.
    Close,
    /// Current tab snapshot for the surface.
    SetCurTab {
        /// Tab the surface should operate on.
        #[serde(rename = "curTab")]
        cur_tab: TabInfo,
    },
    /// Result of a `sendViaRPC` relay.
    RpcResp {
        /// Caller-supplied correlation id.
        id: u64,
        /// Response status.
        status: u16,
        /// Response body.
        body: Value,
    },
}

/// Command sent from a surface to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum SurfaceToHub {
    /// The surface is going away; forget its context.
    ClearCurTab,
    /// Open or refocus the bookmark lookup page.
    OpenPageGetBookmark {
        /// Tab to operate on.
        #[serde(rename = "curTab", default)]
        cur_tab: Option<TabInfo>,
    },
    /// Open or refocus the tags tree page.
    OpenPageTagsTree {
        /// Tab to operate on.
        #[serde(rename = "curTab", default)]
        cur_tab: Option<TabInfo>,
    },
    /// Open or refocus the editor for one bookmark.
    OpenPageEditBookmarks {
        /// Bookmark to edit.
        #[serde(rename = "bkmId")]
        bkm_id: u64,
        /// Tab to operate on.
        #[serde(rename = "curTab", default)]
        cur_tab: Option<TabInfo>,
    },
    /// Open or refocus the editor for one tag.
    OpenPageEditTag {
        /// Tag to edit.
        #[serde(rename = "tagId")]
        tag_id: u64,
        /// Tab to operate on.
        #[serde(rename = "curTab", default)]
        cur_tab: Option<TabInfo>,
    },
    /// Open or refocus the login page.
    OpenPageLogin {
        /// Function the login page should call when done.
        #[serde(rename = "backFunc", default)]
        back_func: Option<String>,
        /// Arguments for `back_func`.
        #[serde(rename = "backArgs", default)]
        back_args: Option<Value>,
        /// Tab to operate on.
        #[serde(rename = "curTab", default)]
        cur_tab: Option<TabInfo>,
    },
    /// Relay a call to the hub-owned RPC client.
    #[serde(rename = "sendViaRPC")]
    SendViaRpc {
        /// Correlation id local to the calling bridge.
        id: u64,
        /// RPC method name (`getTagsByPattern`, ...).
        #[serde(rename = "funcName")]
        func_name: String,
        /// Positional arguments.
        #[serde(default)]
        args: Vec<Value>,
    },
}

/// Failure to decode a message-channel frame.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// `type` was missing or not `"cmd"`.
    #[error("unsupported message type: {0}")]
    UnsupportedType(String),
    /// Payload did not match any known command.
    #[error("invalid command: {0}")]
    InvalidCommand(#[from] serde_json::Error),
}

fn to_wire<T: Serialize>(cmd: &T) -> Value {
    let mut value = serde_json::to_value(cmd).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert("type".to_string(), Value::String(CMD_TYPE.to_string()));
    }
    value
}

fn from_wire<T: DeserializeOwned>(mut value: Value) -> Result<T, MessageError> {
    let kind = match &mut value {
        Value::Object(map) => map.remove("type"),
        _ => None,
    };
    match kind {
        Some(Value::String(kind)) if kind == CMD_TYPE => Ok(serde_json::from_value(value)?),
        Some(other) => Err(MessageError::UnsupportedType(other.to_string())),
        None => Err(MessageError::UnsupportedType("<missing>".to_string())),
    }
}

impl HubToSurface {
    /// Encode as a `{"type": "cmd", ...}` frame.
    pub fn to_wire(&self) -> Value {
        to_wire(self)
    }

    /// Decode a `{"type": "cmd", ...}` frame.
    pub fn from_wire(value: Value) -> Result<Self, MessageError> {
        from_wire(value)
    }
}

impl SurfaceToHub {
    /// Encode as a `{"type": "cmd", ...}` frame.
    pub fn to_wire(&self) -> Value {
        to_wire(self)
    }

    /// Decode a `{"type": "cmd", ...}` frame.
    pub fn from_wire(value: Value) -> Result<Self, MessageError> {
        from_wire(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hub_commands_wire_shape() {
        assert_eq!(HubToSurface::Focus.to_wire(), json!({"type": "cmd", "cmd": "focus"}));
        assert_eq!(
            HubToSurface::SetCurTab {
                cur_tab: TabInfo::new("http://a", "A")
            }
            .to_wire(),
            json!({"type": "cmd", "cmd": "setCurTab", "curTab": {"url": "http://a", "title": "A"}})
        );
        assert_eq!(
            HubToSurface::RpcResp {
                id: 4,
                status: 200,
                body: json!([])
            }
            .to_wire(),
            json!({"type": "cmd", "cmd": "rpcResp", "id": 4, "status": 200, "body": []})
        );
    }

    #[test]
    fn test_surface_commands_decode() {
        let msg = SurfaceToHub::from_wire(json!({
            "type": "cmd", "cmd": "openPageEditBookmarks", "bkmId": 42,
            "curTab": {"url": "http://a", "title": "A"}
        }))
        .unwrap();
        assert_eq!(
            msg,
            SurfaceToHub::OpenPageEditBookmarks {
                bkm_id: 42,
                cur_tab: Some(TabInfo::new("http://a", "A")),
            }
        );

        let msg = SurfaceToHub::from_wire(json!({
            "type": "cmd", "cmd": "sendViaRPC", "id": 1,
            "funcName": "getTagsByPattern", "args": ["wor", false]
        }))
        .unwrap();
        assert!(matches!(msg, SurfaceToHub::SendViaRpc { id: 1, ref func_name, .. } if func_name == "getTagsByPattern"));

        let msg = SurfaceToHub::from_wire(json!({"type": "cmd", "cmd": "clearCurTab"})).unwrap();
        assert_eq!(msg, SurfaceToHub::ClearCurTab);
    }

    #[test]
    fn test_decode_rejects_unknown_type_and_command() {
        assert!(matches!(
            SurfaceToHub::from_wire(json!({"type": "response", "cmd": "clearCurTab"})),
            Err(MessageError::UnsupportedType(_))
        ));
        assert!(matches!(
            SurfaceToHub::from_wire(json!({"cmd": "clearCurTab"})),
            Err(MessageError::UnsupportedType(_))
        ));
        assert!(matches!(
            SurfaceToHub::from_wire(json!({"type": "cmd", "cmd": "getCurTab"})),
            Err(MessageError::InvalidCommand(_))
        ));
    }
}
