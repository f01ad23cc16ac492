//! Categories, tags, posts and post images.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::models::{Category, Post, PostImage, PostStatus, Tag};
use super::new_id;

/// Lowercase ASCII letters and digits joined by single hyphens.
///
/// "Make & n8n: Getting Started" -> "make-n8n-getting-started"
pub fn slugify(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Tables with a unique `slug` column.
#[derive(Debug, Clone, Copy)]
pub enum SlugTable {
    Categories,
    Tags,
    Posts,
}

impl SlugTable {
    fn name(&self) -> &'static str {
        match self {
            SlugTable::Categories => "categories",
            SlugTable::Tags => "tags",
            SlugTable::Posts => "posts",
        }
    }
}

pub fn slug_taken(
    conn: &Connection,
    table: SlugTable,
    slug: &str,
    exclude_id: Option<&str>,
) -> rusqlite::Result<bool> {
    conn.query_row(
        &format!(
            "SELECT COUNT(*) > 0 FROM {} WHERE slug = ?1 AND id != COALESCE(?2, '')",
            table.name()
        ),
        params![slug, exclude_id],
        |row| row.get(0),
    )
}

/// `base`, or `base-2`, `base-3`, ... whichever is free first.
pub fn unique_slug(conn: &Connection, table: SlugTable, base: &str) -> rusqlite::Result<String> {
    let base = if base.is_empty() { "item" } else { base };
    let mut candidate = base.to_string();
    let mut n = 2;
    while slug_taken(conn, table, &candidate, None)? {
        candidate = format!("{}-{}", base, n);
        n += 1;
    }
    Ok(candidate)
}

// -- Categories --

#[derive(Debug, Clone, Serialize)]
pub struct CategoryWithCount {
    #[serde(flatten)]
    pub category: Category,
    pub post_count: i64,
}

const CATEGORY_WITH_COUNT: &str = "SELECT c.id, c.name, c.slug, c.description, \
     (SELECT COUNT(*) FROM posts p WHERE p.category_id = c.id) FROM categories c";

fn category_with_count(row: &rusqlite::Row<'_>) -> rusqlite::Result<CategoryWithCount> {
    Ok(CategoryWithCount {
        category: Category::from_row(row)?,
        post_count: row.get(4)?,
    })
}

pub fn list_categories(
    conn: &Connection,
    slug: Option<&str>,
) -> rusqlite::Result<Vec<CategoryWithCount>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE ?1 IS NULL OR c.slug = ?1 ORDER BY c.name ASC",
        CATEGORY_WITH_COUNT
    ))?;
    let rows = stmt
        .query_map(params![slug], category_with_count)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_category(conn: &Connection, id: &str) -> rusqlite::Result<Option<CategoryWithCount>> {
    conn.query_row(
        &format!("{} WHERE c.id = ?1", CATEGORY_WITH_COUNT),
        params![id],
        category_with_count,
    )
    .optional()
}

pub fn category_by_id(conn: &Connection, id: &str) -> rusqlite::Result<Option<Category>> {
    conn.query_row(
        &format!("SELECT {} FROM categories WHERE id = ?1", Category::COLUMNS),
        params![id],
        Category::from_row,
    )
    .optional()
}

/// Body for category create (all fields) and update (present fields only).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryInput {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
}

pub fn insert_category(
    conn: &Connection,
    name: &str,
    slug: &str,
    description: Option<&str>,
) -> rusqlite::Result<Category> {
    let id = new_id();
    conn.execute(
        "INSERT INTO categories (id, name, slug, description) VALUES (?1, ?2, ?3, ?4)",
        params![id, name, slug, description],
    )?;
    conn.query_row(
        &format!("SELECT {} FROM categories WHERE id = ?1", Category::COLUMNS),
        params![id],
        Category::from_row,
    )
}

pub fn update_category(
    conn: &Connection,
    id: &str,
    input: &CategoryInput,
) -> rusqlite::Result<Option<Category>> {
    let changed = conn.execute(
        "UPDATE categories SET
            name = COALESCE(?2, name),
            slug = COALESCE(?3, slug),
            description = COALESCE(?4, description)
         WHERE id = ?1",
        params![id, input.name, input.slug, input.description],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    category_by_id(conn, id)
}

pub fn delete_category(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    Ok(conn.execute("DELETE FROM categories WHERE id = ?1", params![id])? > 0)
}

// -- Tags --

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagInput {
    pub name: Option<String>,
    pub slug: Option<String>,
}

pub fn list_tags(conn: &Connection) -> rusqlite::Result<Vec<Tag>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM tags ORDER BY name ASC",
        Tag::COLUMNS
    ))?;
    let tags = stmt
        .query_map([], Tag::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tags)
}

pub fn find_tag(conn: &Connection, id: &str) -> rusqlite::Result<Option<Tag>> {
    conn.query_row(
        &format!("SELECT {} FROM tags WHERE id = ?1", Tag::COLUMNS),
        params![id],
        Tag::from_row,
    )
    .optional()
}

pub fn insert_tag(conn: &Connection, name: &str, slug: &str) -> rusqlite::Result<Tag> {
    let id = new_id();
    conn.execute(
        "INSERT INTO tags (id, name, slug) VALUES (?1, ?2, ?3)",
        params![id, name, slug],
    )?;
    Ok(Tag {
        id,
        name: name.to_string(),
        slug: slug.to_string(),
    })
}

pub fn update_tag(conn: &Connection, id: &str, input: &TagInput) -> rusqlite::Result<Option<Tag>> {
    let changed = conn.execute(
        "UPDATE tags SET name = COALESCE(?2, name), slug = COALESCE(?3, slug) WHERE id = ?1",
        params![id, input.name, input.slug],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    find_tag(conn, id)
}

pub fn delete_tag(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    Ok(conn.execute("DELETE FROM tags WHERE id = ?1", params![id])? > 0)
}

/// Ids from `ids` that have no row in `table`.
pub fn missing_ids(conn: &Connection, table: &str, ids: &[String]) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("SELECT COUNT(*) > 0 FROM {} WHERE id = ?1", table))?;
    let mut missing = Vec::new();
    for id in ids {
        let exists: bool = stmt.query_row(params![id], |row| row.get(0))?;
        if !exists {
            missing.push(id.clone());
        }
    }
    Ok(missing)
}

// -- Posts --

#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub category_slug: Option<String>,
    pub search: Option<String>,
    pub oldest_first: bool,
}

pub fn list_posts(conn: &Connection, filter: &PostFilter) -> rusqlite::Result<Vec<Post>> {
    let columns = Post::COLUMNS
        .split(", ")
        .map(|c| format!("p.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "SELECT {} FROM posts p JOIN categories c ON c.id = p.category_id WHERE 1 = 1",
        columns
    );
    let mut args: Vec<String> = Vec::new();

    if let Some(slug) = filter.category_slug.as_deref().filter(|s| !s.is_empty()) {
        args.push(slug.to_string());
        sql.push_str(&format!(" AND c.slug = ?{}", args.len()));
    }
    if let Some(term) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        args.push(format!("%{}%", term.to_lowercase()));
        let n = args.len();
        sql.push_str(&format!(
            " AND (LOWER(p.title) LIKE ?{n} OR LOWER(p.content) LIKE ?{n})"
        ));
    }
    sql.push_str(if filter.oldest_first {
        " ORDER BY p.created_at ASC, p.id ASC"
    } else {
        " ORDER BY p.created_at DESC, p.id DESC"
    });

    let mut stmt = conn.prepare(&sql)?;
    let posts = stmt
        .query_map(params_from_iter(args.iter()), Post::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(posts)
}

pub fn find_post(conn: &Connection, id: &str) -> rusqlite::Result<Option<Post>> {
    conn.query_row(
        &format!("SELECT {} FROM posts WHERE id = ?1", Post::COLUMNS),
        params![id],
        Post::from_row,
    )
    .optional()
}

pub fn increment_views(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute("UPDATE posts SET views = views + 1 WHERE id = ?1", params![id])?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub slug: String,
    pub content: String,
    pub category_id: String,
    pub author_id: String,
    pub video_url: Option<String>,
    pub status: PostStatus,
    pub tag_ids: Vec<String>,
    pub resource_ids: Vec<String>,
}

/// Insert a post with its tag and resource links. Run inside a transaction.
pub fn insert_post(conn: &Connection, new: &NewPost) -> rusqlite::Result<Post> {
    let id = new_id();
    conn.execute(
        "INSERT INTO posts (id, title, slug, content, category_id, author_id, video_url, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            new.title,
            new.slug,
            new.content,
            new.category_id,
            new.author_id,
            new.video_url,
            new.status
        ],
    )?;
    replace_links(conn, &id, "post_tags", "tag_id", &new.tag_ids)?;
    replace_links(conn, &id, "post_resources", "resource_id", &new.resource_ids)?;
    conn.query_row(
        &format!("SELECT {} FROM posts WHERE id = ?1", Post::COLUMNS),
        params![id],
        Post::from_row,
    )
}

/// Typed partial update. Absent fields keep their stored value; an empty
/// `video_url` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostPatch {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub content: Option<String>,
    pub category_id: Option<String>,
    pub video_url: Option<String>,
    pub status: Option<PostStatus>,
    pub tag_ids: Option<Vec<String>>,
    pub resource_ids: Option<Vec<String>>,
}

/// Run inside a transaction.
pub fn update_post(conn: &Connection, id: &str, patch: &PostPatch) -> rusqlite::Result<Option<Post>> {
    let changed = conn.execute(
        "UPDATE posts SET
            title = COALESCE(?2, title),
            slug = COALESCE(?3, slug),
            content = COALESCE(?4, content),
            category_id = COALESCE(?5, category_id),
            video_url = CASE WHEN ?6 IS NULL THEN video_url ELSE NULLIF(?6, '') END,
            status = COALESCE(?7, status),
            updated_at = datetime('now')
         WHERE id = ?1",
        params![
            id,
            patch.title,
            patch.slug,
            patch.content,
            patch.category_id,
            patch.video_url,
            patch.status
        ],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    if let Some(tag_ids) = &patch.tag_ids {
        replace_links(conn, id, "post_tags", "tag_id", tag_ids)?;
    }
    if let Some(resource_ids) = &patch.resource_ids {
        replace_links(conn, id, "post_resources", "resource_id", resource_ids)?;
    }
    find_post(conn, id)
}

pub fn delete_post(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    Ok(conn.execute("DELETE FROM posts WHERE id = ?1", params![id])? > 0)
}

fn replace_links(
    conn: &Connection,
    post_id: &str,
    table: &str,
    column: &str,
    ids: &[String],
) -> rusqlite::Result<()> {
    conn.execute(
        &format!("DELETE FROM {} WHERE post_id = ?1", table),
        params![post_id],
    )?;
    let mut stmt = conn.prepare(&format!(
        "INSERT OR IGNORE INTO {} (post_id, {}) VALUES (?1, ?2)",
        table, column
    ))?;
    for id in ids {
        stmt.execute(params![post_id, id])?;
    }
    Ok(())
}

pub fn tags_for_post(conn: &Connection, post_id: &str) -> rusqlite::Result<Vec<Tag>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.slug FROM tags t
         JOIN post_tags pt ON pt.tag_id = t.id
         WHERE pt.post_id = ?1 ORDER BY t.name ASC",
    )?;
    let tags = stmt
        .query_map(params![post_id], Tag::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tags)
}

pub fn resource_ids_for_post(conn: &Connection, post_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT resource_id FROM post_resources WHERE post_id = ?1 ORDER BY resource_id")?;
    let ids = stmt
        .query_map(params![post_id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Like and comment totals for a post.
pub fn post_counts(conn: &Connection, post_id: &str) -> rusqlite::Result<(i64, i64)> {
    conn.query_row(
        "SELECT (SELECT COUNT(*) FROM likes WHERE post_id = ?1),
                (SELECT COUNT(*) FROM comments WHERE post_id = ?1)",
        params![post_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
}

// -- Post images --

pub fn images_for_post(conn: &Connection, post_id: &str) -> rusqlite::Result<Vec<PostImage>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM post_images WHERE post_id = ?1 ORDER BY uploaded_at ASC, id ASC",
        PostImage::COLUMNS
    ))?;
    let images = stmt
        .query_map(params![post_id], PostImage::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(images)
}

pub fn count_images(conn: &Connection, post_id: &str) -> rusqlite::Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM post_images WHERE post_id = ?1",
        params![post_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

pub fn insert_image(
    conn: &Connection,
    id: &str,
    post_id: &str,
    object_key: &str,
    url: &str,
) -> rusqlite::Result<PostImage> {
    conn.execute(
        "INSERT INTO post_images (id, post_id, object_key, url) VALUES (?1, ?2, ?3, ?4)",
        params![id, post_id, object_key, url],
    )?;
    conn.query_row(
        &format!("SELECT {} FROM post_images WHERE id = ?1", PostImage::COLUMNS),
        params![id],
        PostImage::from_row,
    )
}

pub fn find_image(conn: &Connection, id: &str) -> rusqlite::Result<Option<PostImage>> {
    conn.query_row(
        &format!("SELECT {} FROM post_images WHERE id = ?1", PostImage::COLUMNS),
        params![id],
        PostImage::from_row,
    )
    .optional()
}

pub fn delete_image(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    Ok(conn.execute("DELETE FROM post_images WHERE id = ?1", params![id])? > 0)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::db::accounts::{insert_user, NewUser};
    use crate::db::models::Role;

    pub fn author(conn: &Connection, email: &str) -> String {
        insert_user(
            conn,
            &NewUser {
                email: email.to_string(),
                first_name: "Post".to_string(),
                last_name: "Author".to_string(),
                role: Role::Author,
                img_url: None,
            },
        )
        .unwrap()
        .id
    }

    pub fn category_id(conn: &Connection, slug: &str) -> String {
        conn.query_row("SELECT id FROM categories WHERE slug = ?1", params![slug], |r| {
            r.get(0)
        })
        .unwrap()
    }

    pub fn post(conn: &Connection, author_id: &str, title: &str, category_slug: &str) -> Post {
        let slug = unique_slug(conn, SlugTable::Posts, &slugify(title)).unwrap();
        insert_post(
            conn,
            &NewPost {
                title: title.to_string(),
                slug,
                content: format!("Body of {}", title),
                category_id: category_id(conn, category_slug),
                author_id: author_id.to_string(),
                video_url: None,
                status: PostStatus::Published,
                tag_ids: vec![],
                resource_ids: vec![],
            },
        )
        .unwrap()
    }
}
