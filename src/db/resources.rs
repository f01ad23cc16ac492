use rusqlite::{params, Connection, OptionalExtension};

use super::models::{Resource, Tool};

#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    pub search: Option<String>,
    pub tool: Option<Tool>,
    pub user_id: Option<String>,
}

pub fn list_resources(conn: &Connection, filter: &ResourceFilter) -> rusqlite::Result<Vec<Resource>> {
    let search = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s.to_lowercase()));

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM resources
         WHERE (?1 IS NULL OR LOWER(title) LIKE ?1 OR LOWER(COALESCE(description, '')) LIKE ?1)
           AND (?2 IS NULL OR tool = ?2)
           AND (?3 IS NULL OR user_id = ?3)
         ORDER BY created_at DESC, id DESC",
        Resource::COLUMNS
    ))?;
    let resources = stmt
        .query_map(params![search, filter.tool, filter.user_id], Resource::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(resources)
}

pub fn find_resource(conn: &Connection, id: &str) -> rusqlite::Result<Option<Resource>> {
    conn.query_row(
        &format!("SELECT {} FROM resources WHERE id = ?1", Resource::COLUMNS),
        params![id],
        Resource::from_row,
    )
    .optional()
}

pub struct NewResource<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub tool: Tool,
    pub file_key: &'a str,
    pub file_name: &'a str,
}

pub fn insert_resource(conn: &Connection, new: &NewResource<'_>) -> rusqlite::Result<Resource> {
    conn.execute(
        "INSERT INTO resources (id, user_id, title, description, tool, file_key, file_name)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            new.id,
            new.user_id,
            new.title,
            new.description,
            new.tool,
            new.file_key,
            new.file_name
        ],
    )?;
    conn.query_row(
        &format!("SELECT {} FROM resources WHERE id = ?1", Resource::COLUMNS),
        params![new.id],
        Resource::from_row,
    )
}

#[derive(Debug, Clone, Default)]
pub struct ResourcePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tool: Option<Tool>,
    /// Replacement object key and client file name.
    pub file: Option<(String, String)>,
}

pub fn update_resource(
    conn: &Connection,
    id: &str,
    patch: &ResourcePatch,
) -> rusqlite::Result<Option<Resource>> {
    let (file_key, file_name) = match &patch.file {
        Some((key, name)) => (Some(key.as_str()), Some(name.as_str())),
        None => (None, None),
    };
    let changed = conn.execute(
        "UPDATE resources SET
            title = COALESCE(?2, title),
            description = COALESCE(?3, description),
            tool = COALESCE(?4, tool),
            file_key = COALESCE(?5, file_key),
            file_name = COALESCE(?6, file_name),
            updated_at = datetime('now')
         WHERE id = ?1",
        params![id, patch.title, patch.description, patch.tool, file_key, file_name],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    find_resource(conn, id)
}

pub fn delete_resource(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    Ok(conn.execute("DELETE FROM resources WHERE id = ?1", params![id])? > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::posts::fixtures::author;
    use crate::db::test_pool;

    fn seed(conn: &Connection, user_id: &str, id: &str, title: &str, tool: Tool) -> Resource {
        insert_resource(
            conn,
            &NewResource {
                id,
                user_id,
                title,
                description: Some("A workflow export"),
                tool,
                file_key: &format!("{}.json", id),
                file_name: "flow.json",
            },
        )
        .unwrap()
    }

    #[test]
    fn filters_by_search_tool_and_owner() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let alice = author(&conn, "alice@x.com");
        let bob = author(&conn, "bob@x.com");
        seed(&conn, &alice, "r1", "Invoice scraper", Tool::Make);
        seed(&conn, &bob, "r2", "Lead router", Tool::N8n);

        let all = list_resources(&conn, &ResourceFilter::default()).unwrap();
        assert_eq!(all.len(), 2);

        let by_tool = list_resources(
            &conn,
            &ResourceFilter {
                tool: Some(Tool::N8n),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(by_tool.len(), 1);
        assert_eq!(by_tool[0].id, "r2");

        let searched = list_resources(
            &conn,
            &ResourceFilter {
                search: Some("invoice".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(searched.len(), 1);

        let mine = list_resources(
            &conn,
            &ResourceFilter {
                user_id: Some(alice.clone()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].user_id, alice);
    }

    #[test]
    fn patch_keeps_file_unless_replaced() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let alice = author(&conn, "alice@x.com");
        seed(&conn, &alice, "r1", "Old", Tool::Other);

        let renamed = update_resource(
            &conn,
            "r1",
            &ResourcePatch {
                title: Some("New".to_string()),
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap();
        assert_eq!(renamed.title, "New");
        assert_eq!(renamed.file_key, "r1.json");

        let replaced = update_resource(
            &conn,
            "r1",
            &ResourcePatch {
                file: Some(("other.json".to_string(), "v2.json".to_string())),
                ..Default::default()
            },
        )
        .unwrap()
        .unwrap();
        assert_eq!(replaced.file_key, "other.json");
        assert_eq!(replaced.file_name, "v2.json");
    }
}
