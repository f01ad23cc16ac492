use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Enums stored as TEXT columns with a fixed set of values.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("\"{}\" is not a valid choice.", other)),
                }
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }
    };
}

text_enum!(Role {
    Admin => "admin",
    Author => "author",
});

text_enum!(AuthProvider {
    Email => "email",
    Google => "google",
    Github => "github",
    Linkedin => "linkedin",
});

text_enum!(PostStatus {
    Draft => "draft",
    Published => "published",
    Archived => "archived",
});

text_enum!(Tool {
    RelevanceAi => "Relevance AI",
    Make => "Make",
    N8n => "n8n",
    Other => "Other",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub img_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub const COLUMNS: &'static str = "id, first_name, last_name, email, role, is_active, \
         is_staff, is_superuser, img_url, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            first_name: row.get(1)?,
            last_name: row.get(2)?,
            email: row.get(3)?,
            role: row.get(4)?,
            is_active: row.get(5)?,
            is_staff: row.get(6)?,
            is_superuser: row.get(7)?,
            img_url: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

/// Authentication record, one per user. `password` is a bcrypt hash or absent.
#[derive(Debug, Clone)]
pub struct Credential {
    pub id: String,
    pub user_id: String,
    pub auth_provider: AuthProvider,
    pub password: Option<String>,
    pub is_verified: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Credential {
    pub const COLUMNS: &'static str =
        "id, user_id, auth_provider, password, is_verified, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            auth_provider: row.get(2)?,
            password: row.get(3)?,
            is_verified: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
}

impl Category {
    pub const COLUMNS: &'static str = "id, name, slug, description";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            description: row.get(3)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub slug: String,
}

impl Tag {
    pub const COLUMNS: &'static str = "id, name, slug";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub category_id: String,
    pub author_id: String,
    pub video_url: Option<String>,
    pub views: i64,
    pub status: PostStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl Post {
    pub const COLUMNS: &'static str = "id, title, slug, content, category_id, author_id, \
         video_url, views, status, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            slug: row.get(2)?,
            content: row.get(3)?,
            category_id: row.get(4)?,
            author_id: row.get(5)?,
            video_url: row.get(6)?,
            views: row.get(7)?,
            status: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PostImage {
    pub id: String,
    #[serde(rename = "post")]
    pub post_id: String,
    #[serde(skip)]
    pub object_key: String,
    pub url: String,
    pub uploaded_at: String,
}

impl PostImage {
    pub const COLUMNS: &'static str = "id, post_id, object_key, url, uploaded_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            post_id: row.get(1)?,
            object_key: row.get(2)?,
            url: row.get(3)?,
            uploaded_at: row.get(4)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Resource {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub tool: Tool,
    pub file_key: String,
    pub file_name: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Resource {
    pub const COLUMNS: &'static str = "id, user_id, title, description, tool, file_key, \
         file_name, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            tool: row.get(4)?,
            file_key: row.get(5)?,
            file_name: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub id: String,
    #[serde(rename = "post")]
    pub post_id: String,
    #[serde(rename = "user")]
    pub user_id: String,
    pub content: String,
    #[serde(rename = "parent_comment")]
    pub parent_comment_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Comment {
    pub const COLUMNS: &'static str =
        "id, post_id, user_id, content, parent_comment_id, created_at, updated_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            post_id: row.get(1)?,
            user_id: row.get(2)?,
            content: row.get(3)?,
            parent_comment_id: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

/// A like or a bookmark; both are a unique (user, post) pair.
#[derive(Debug, Clone, Serialize)]
pub struct PostMark {
    pub id: String,
    #[serde(rename = "post")]
    pub post_id: String,
    #[serde(rename = "user")]
    pub user_id: String,
    pub created_at: String,
}

impl PostMark {
    pub const COLUMNS: &'static str = "id, post_id, user_id, created_at";

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            post_id: row.get(1)?,
            user_id: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_text() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(Role::Author.as_str(), "author");
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn tool_accepts_display_names() {
        assert_eq!("Relevance AI".parse::<Tool>().unwrap(), Tool::RelevanceAi);
        assert_eq!("n8n".parse::<Tool>().unwrap(), Tool::N8n);
        assert!("Zapier".parse::<Tool>().is_err());
    }

    #[test]
    fn enums_serialize_as_stored_text() {
        assert_eq!(serde_json::to_string(&AuthProvider::Google).unwrap(), "\"google\"");
        assert_eq!(serde_json::to_string(&Tool::RelevanceAi).unwrap(), "\"Relevance AI\"");
    }

    #[test]
    fn invalid_choice_message_names_the_value() {
        let err = "pending".parse::<PostStatus>().unwrap_err();
        assert_eq!(err, "\"pending\" is not a valid choice.");
    }
}
