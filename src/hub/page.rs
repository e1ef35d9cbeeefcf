//! Page targets: which UI surface a command opens.
//!
//! A target determines its page key and the query parameters of the
//! surface window. The key is the identity of the surface: opening the same
//! key twice refocuses the existing window.
//!
//! | target | page key | open params |
//! |---|---|---|
//! | `GetBookmark` | `getBookmark` | `page=get-bookmark` |
//! | `TagsTree` | `tagsTree` | `page=tags-tree` |
//! | `EditBookmark` | `editBookmark-{id}` | `page=edit-bookmark&bkm_id={id}` |
//! | `EditTag` | `editTag-{id}` | `page=edit-tag&tag_id={id}` |
//! | `LoginLogout` | `loginLogout` | `page=login-logout&back_func=…&back_args=…` |

use serde_json::Value;

use crate::protocol::{SurfaceToHub, TabInfo};

/// Path of the wrapper page hosting every surface.
const PAGE_WRAPPER: &str = "/page-wrapper/page-wrapper.html";

/// A UI surface the hub can open.
#[derive(Debug, Clone, PartialEq)]
pub enum PageTarget {
    /// Bookmark lookup for the current tab.
    GetBookmark,
    /// Tag tree browser.
    TagsTree,
    /// Bookmark editor.
    EditBookmark {
        /// Bookmark id.
        id: u64,
    },
    /// Tag editor.
    EditTag {
        /// Tag id.
        id: u64,
    },
    /// Login/logout page, optionally calling back into the opener when done.
    LoginLogout {
        /// Function to call after login.
        back_func: Option<String>,
        /// Arguments for `back_func`.
        back_args: Option<Value>,
    },
}

impl PageTarget {
    /// Unique key of the surface.
    pub fn page_key(&self) -> String {
        match self {
            Self::GetBookmark => "getBookmark".to_string(),
            Self::TagsTree => "tagsTree".to_string(),
            Self::EditBookmark { id } => format!("editBookmark-{id}"),
            Self::EditTag { id } => format!("editTag-{id}"),
            Self::LoginLogout { .. } => "loginLogout".to_string(),
        }
    }

    /// Query parameters selecting the page inside the wrapper.
    pub fn open_params(&self) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        match self {
            Self::GetBookmark => {
                query.append_pair("page", "get-bookmark");
            }
            Self::TagsTree => {
                query.append_pair("page", "tags-tree");
            }
            Self::EditBookmark { id } => {
                query
                    .append_pair("page", "edit-bookmark")
                    .append_pair("bkm_id", &id.to_string());
            }
            Self::EditTag { id } => {
                query
                    .append_pair("page", "edit-tag")
                    .append_pair("tag_id", &id.to_string());
            }
            Self::LoginLogout {
                back_func,
                back_args,
            } => {
                query.append_pair("page", "login-logout");
                if let Some(func) = back_func {
                    query.append_pair("back_func", func);
                }
                if let Some(args) = back_args {
                    query.append_pair("back_args", &args.to_string());
                }
            }
        }
        query.finish()
    }

    /// Split an `openPage*` command into its target and tab snapshot.
    ///
    /// Returns `None` for commands that do not open a page.
    pub fn from_command(cmd: &SurfaceToHub) -> Option<(Self, Option<TabInfo>)> {
        let (target, tab) = match cmd {
            SurfaceToHub::OpenPageGetBookmark { cur_tab } => (Self::GetBookmark, cur_tab),
            SurfaceToHub::OpenPageTagsTree { cur_tab } => (Self::TagsTree, cur_tab),
            SurfaceToHub::OpenPageEditBookmarks { bkm_id, cur_tab } => {
                (Self::EditBookmark { id: *bkm_id }, cur_tab)
            }
            SurfaceToHub::OpenPageEditTag { tag_id, cur_tab } => {
                (Self::EditTag { id: *tag_id }, cur_tab)
            }
            SurfaceToHub::OpenPageLogin {
                back_func,
                back_args,
                cur_tab,
            } => (
                Self::LoginLogout {
                    back_func: back_func.clone(),
                    back_args: back_args.clone(),
                },
                cur_tab,
            ),
            SurfaceToHub::ClearCurTab | SurfaceToHub::SendViaRpc { .. } => return None,
        };
        Some((target, tab.clone()))
    }
}

/// Address of the window hosting `page_key`.
pub fn window_url(page_key: &str, open_params: &str) -> String {
    let port_name: String = url::form_urlencoded::byte_serialize(page_key.as_bytes()).collect();
    if open_params.is_empty() {
        format!("{PAGE_WRAPPER}?port_name={port_name}")
    } else {
        format!("{PAGE_WRAPPER}?{open_params}&port_name={port_name}")
    }
}
