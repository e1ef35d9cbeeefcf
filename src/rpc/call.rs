//! Closed set of resource operations.
//!
//! Every operation has two faces:
//!
//! - a typed [`RpcCall`] variant, mapped to a [`Request`] by
//!   [`RpcCall::to_request`]
//! - a bridge form `(funcName, args)` carried by `sendViaRPC`, parsed by
//!   [`RpcCall::from_parts`]
//!
//! | funcName | args |
//! |---|---|
//! | `getTagsTree` | `[]` |
//! | `getTag` | `[pathOrId]` |
//! | `getTagsByPattern` | `[pattern, allowNew?]` |
//! | `addTag` | `[parentPath, {names, description, createIntermediary}]` |
//! | `updateTag` | `[pathOrId, {names, description, parentTagID}]` |
//! | `deleteTag` | `[pathOrId, "keep" \| "del"]` |
//! | `getTaggedBookmarks` | `[[tagId, ...]]` |
//! | `getBookmarksByURL` | `[url]` |
//! | `getBookmarkByID` | `[id]` |
//! | `addBookmark` | `[{url, title, comment, tagIDs}]` |
//! | `updateBookmark` | `[id, {url, title, comment, tagIDs}]` |
//! | `deleteBookmark` | `[id]` |

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RpcError;
use crate::protocol::{Method, Request};

/// Fields of a new tag.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTag {
    /// Names of the tag; the first is the primary one.
    pub names: Vec<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Create missing intermediary tags along the parent path.
    #[serde(default)]
    pub create_intermediary: bool,
}

/// Fields of a tag update.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TagUpdate {
    /// Names of the tag.
    pub names: Vec<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Id of the new parent tag.
    #[serde(rename = "parentTagID")]
    pub parent_tag_id: u64,
}

/// Fields of a bookmark, used for both create and update.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BookmarkData {
    /// Bookmarked URL.
    pub url: String,
    /// Title shown in lists.
    #[serde(default)]
    pub title: String,
    /// Free-form comment.
    #[serde(default)]
    pub comment: String,
    /// Ids of the tags attached to the bookmark.
    #[serde(rename = "tagIDs", default)]
    pub tag_ids: Vec<u64>,
}

/// What happens to a deleted tag's parent once it has no children left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafPolicy {
    /// Keep the bookmarks tagged with the parent.
    #[default]
    Keep,
    /// Delete them.
    Del,
}

impl LeafPolicy {
    fn as_str(self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::Del => "del",
        }
    }
}

/// One resource operation.
///
/// Tag references (`tag`, `parent`) are either a numeric id or a tag path
/// such as `work/rust`; a leading `/` is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcCall {
    /// Whole tag tree of the user.
    GetTagsTree,
    /// One tag.
    GetTag {
        /// Tag path or id.
        tag: String,
    },
    /// Flat list of tags matching a pattern.
    GetTagsByPattern {
        /// Search pattern.
        pattern: String,
        /// Also offer the pattern as a new tag.
        allow_new: bool,
    },
    /// Create a tag under `parent`.
    AddTag {
        /// Parent tag path or id.
        parent: String,
        /// New tag fields.
        data: NewTag,
    },
    /// Update a tag.
    UpdateTag {
        /// Tag path or id.
        tag: String,
        /// Updated fields.
        data: TagUpdate,
    },
    /// Delete a tag.
    DeleteTag {
        /// Tag path or id.
        tag: String,
        /// Leaf policy.
        policy: LeafPolicy,
    },
    /// Bookmarks carrying all of the given tags.
    GetTaggedBookmarks {
        /// Tag ids.
        tag_ids: Vec<u64>,
    },
    /// Bookmarks with the given URL.
    GetBookmarksByUrl {
        /// URL to look up.
        url: String,
    },
    /// One bookmark.
    GetBookmarkById {
        /// Bookmark id.
        id: u64,
    },
    /// Create a bookmark.
    AddBookmark {
        /// Bookmark fields.
        data: BookmarkData,
    },
    /// Update a bookmark.
    UpdateBookmark {
        /// Bookmark id.
        id: u64,
        /// Bookmark fields.
        data: BookmarkData,
    },
    /// Delete a bookmark.
    DeleteBookmark {
        /// Bookmark id.
        id: u64,
    },
}

impl RpcCall {
    /// Bridge name of the operation.
    pub fn func_name(&self) -> &'static str {
        match self {
            Self::GetTagsTree => "getTagsTree",
            Self::GetTag { .. } => "getTag",
            Self::GetTagsByPattern { .. } => "getTagsByPattern",
            Self::AddTag { .. } => "addTag",
            Self::UpdateTag { .. } => "updateTag",
            Self::DeleteTag { .. } => "deleteTag",
            Self::GetTaggedBookmarks { .. } => "getTaggedBookmarks",
            Self::GetBookmarksByUrl { .. } => "getBookmarksByURL",
            Self::GetBookmarkById { .. } => "getBookmarkByID",
            Self::AddBookmark { .. } => "addBookmark",
            Self::UpdateBookmark { .. } => "updateBookmark",
            Self::DeleteBookmark { .. } => "deleteBookmark",
        }
    }

    /// Bridge argument array of the operation.
    pub fn args(&self) -> Vec<Value> {
        match self {
            Self::GetTagsTree => vec![],
            Self::GetTag { tag } => vec![Value::from(tag.as_str())],
            Self::GetTagsByPattern { pattern, allow_new } => {
                vec![Value::from(pattern.as_str()), Value::from(*allow_new)]
            }
            Self::AddTag { parent, data } => vec![Value::from(parent.as_str()), to_value(data)],
            Self::UpdateTag { tag, data } => vec![Value::from(tag.as_str()), to_value(data)],
            Self::DeleteTag { tag, policy } => {
                vec![Value::from(tag.as_str()), Value::from(policy.as_str())]
            }
            Self::GetTaggedBookmarks { tag_ids } => vec![Value::from(tag_ids.clone())],
            Self::GetBookmarksByUrl { url } => vec![Value::from(url.as_str())],
            Self::GetBookmarkById { id } | Self::DeleteBookmark { id } => vec![Value::from(*id)],
            Self::AddBookmark { data } => vec![to_value(data)],
            Self::UpdateBookmark { id, data } => vec![Value::from(*id), to_value(data)],
        }
    }

    /// Parse the bridge form of an operation.
    pub fn from_parts(func_name: &str, args: &[Value]) -> Result<Self, RpcError> {
        let a = Args {
            method: func_name,
            args,
        };
        let call = match func_name {
            "getTagsTree" => Self::GetTagsTree,
            "getTag" => Self::GetTag { tag: a.tag_ref(0)? },
            "getTagsByPattern" => Self::GetTagsByPattern {
                pattern: a.get(0)?,
                allow_new: a.get_or_default(1)?,
            },
            "addTag" => Self::AddTag {
                parent: a.tag_ref(0)?,
                data: a.get(1)?,
            },
            "updateTag" => Self::UpdateTag {
                tag: a.tag_ref(0)?,
                data: a.get(1)?,
            },
            "deleteTag" => Self::DeleteTag {
                tag: a.tag_ref(0)?,
                policy: a.get(1)?,
            },
            "getTaggedBookmarks" => Self::GetTaggedBookmarks { tag_ids: a.get(0)? },
            "getBookmarksByURL" => Self::GetBookmarksByUrl { url: a.get(0)? },
            "getBookmarkByID" => Self::GetBookmarkById { id: a.get(0)? },
            "addBookmark" => Self::AddBookmark { data: a.get(0)? },
            "updateBookmark" => Self::UpdateBookmark {
                id: a.get(0)?,
                data: a.get(1)?,
            },
            "deleteBookmark" => Self::DeleteBookmark { id: a.get(0)? },
            other => return Err(RpcError::UnknownMethod(other.to_string())),
        };
        Ok(call)
    }

    /// Envelope for the operation (id left unassigned).
    pub fn to_request(&self) -> Request {
        match self {
            Self::GetTagsTree => Request::get("/tags"),
            Self::GetTag { tag } => Request::get(tag_path(tag)).value("shape", "single"),
            Self::GetTagsByPattern { pattern, allow_new } => {
                let req = Request::get("/tags")
                    .value("shape", "flat")
                    .value("pattern", pattern.as_str());
                if *allow_new {
                    req.value("allow_new", "1")
                } else {
                    req
                }
            }
            Self::AddTag { parent, data } => {
                Request::new(Method::Post, tag_path(parent)).body(to_value(data))
            }
            Self::UpdateTag { tag, data } => {
                Request::new(Method::Put, tag_path(tag)).body(to_value(data))
            }
            Self::DeleteTag { tag, policy } => {
                Request::new(Method::Delete, tag_path(tag)).value("new_leaf_policy", policy.as_str())
            }
            Self::GetTaggedBookmarks { tag_ids } => Request::get("/bookmarks").value(
                "tag_id",
                tag_ids.iter().map(u64::to_string).collect::<Vec<_>>(),
            ),
            Self::GetBookmarksByUrl { url } => {
                Request::get("/bookmarks").value("url", vec![url.clone()])
            }
            Self::GetBookmarkById { id } => Request::get(format!("/bookmarks/{id}")),
            Self::AddBookmark { data } => {
                Request::new(Method::Post, "/bookmarks").body(to_value(data))
            }
            Self::UpdateBookmark { id, data } => {
                Request::new(Method::Put, format!("/bookmarks/{id}")).body(to_value(data))
            }
            Self::DeleteBookmark { id } => Request::new(Method::Delete, format!("/bookmarks/{id}")),
        }
    }
}

fn tag_path(tag: &str) -> String {
    format!("/tags/{}", tag.trim_start_matches('/'))
}

fn to_value<T: Serialize>(data: &T) -> Value {
    // Plain structs with string keys always serialize.
    serde_json::to_value(data).unwrap_or(Value::Null)
}

/// Positional argument accessor that reports errors against the method.
struct Args<'a> {
    method: &'a str,
    args: &'a [Value],
}

impl Args<'_> {
    fn invalid(&self, message: String) -> RpcError {
        RpcError::InvalidArguments {
            method: self.method.to_string(),
            message,
        }
    }

    fn get<T: DeserializeOwned>(&self, idx: usize) -> Result<T, RpcError> {
        let value = self
            .args
            .get(idx)
            .ok_or_else(|| self.invalid(format!("missing argument {idx}")))?;
        serde_json::from_value(value.clone())
            .map_err(|e| self.invalid(format!("argument {idx}: {e}")))
    }

    fn get_or_default<T: DeserializeOwned + Default>(&self, idx: usize) -> Result<T, RpcError> {
        match self.args.get(idx) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(_) => self.get(idx),
        }
    }

    /// Tag path (string) or tag id (number).
    fn tag_ref(&self, idx: usize) -> Result<String, RpcError> {
        match self.args.get(idx) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(other) => Err(self.invalid(format!(
                "argument {idx}: expected tag path or id, got {other}"
            ))),
            None => Err(self.invalid(format!("missing argument {idx}"))),
        }
    }
}
